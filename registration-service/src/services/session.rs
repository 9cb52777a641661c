//! End-user sessions, delegated to the identity provider.

use secrecy::Secret;
use std::sync::Arc;
use tracing::instrument;

use super::{IdentityProvider, PersonStore, ServiceError, StoreError, UserToken};

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn PersonStore>,
    provider: Arc<dyn IdentityProvider>,
}

impl SessionService {
    pub fn new(store: Arc<dyn PersonStore>, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { store, provider }
    }

    /// Password login for a registered person.
    ///
    /// Unknown emails and any identity provider failure surface as
    /// [`ServiceError::InvalidCredentials`].
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &Secret<String>,
    ) -> Result<UserToken, ServiceError> {
        match self.store.get_by_email(email).await {
            Ok(_) => {}
            Err(StoreError::NotFound) => {
                tracing::info!("Login attempt for unknown email");
                return Err(ServiceError::InvalidCredentials);
            }
            Err(e) => return Err(e.into()),
        }

        let token = self.provider.login(email, password).await.map_err(|e| {
            tracing::info!(error = %e, "Identity provider rejected login");
            ServiceError::InvalidCredentials
        })?;

        tracing::info!("Login succeeded");
        Ok(token)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<UserToken, ServiceError> {
        Ok(self.provider.refresh_token(refresh_token).await?)
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), ServiceError> {
        self.provider.logout(refresh_token).await?;
        tracing::info!("Session ended");
        Ok(())
    }
}
