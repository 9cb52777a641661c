//! Keycloak admin REST client.
//!
//! Admin calls share one service-account session. The session token is
//! refreshed lazily, at most once per expiry window, however many requests
//! find it stale at the same time.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

use super::identity_provider::require;
use super::{Account, IdentityProvider, NewAccount, ProviderError, UserToken};
use crate::config::IdentityProviderConfig;

/// Cached admin access token.
#[derive(Debug, Clone)]
struct AdminSession {
    access_token: String,
    refresh_at: Instant,
}

impl AdminSession {
    /// Schedule the refresh `margin` before expiry, but never earlier than
    /// half the token lifetime, so short-lived tokens are still reused.
    fn issued(access_token: String, lifetime: Duration, margin: Duration) -> Self {
        let margin = if margin > lifetime / 2 {
            tracing::warn!(
                lifetime_secs = lifetime.as_secs(),
                configured_margin_secs = margin.as_secs(),
                "Admin token lifetime is shorter than twice the refresh margin, clamping"
            );
            lifetime / 2
        } else {
            margin
        };
        Self {
            access_token,
            refresh_at: Instant::now() + (lifetime - margin),
        }
    }

    fn needs_refresh(&self) -> bool {
        Instant::now() >= self.refresh_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct RoleRepresentation {
    #[serde(default)]
    id: Option<String>,
    name: String,
}

/// Identity provider backed by the Keycloak admin API.
pub struct KeycloakClient {
    http: Client,
    config: IdentityProviderConfig,
    session: RwLock<AdminSession>,
}

impl KeycloakClient {
    /// Build the HTTP client and open the admin session.
    ///
    /// Fails when the admin login is rejected; the service cannot start
    /// without it.
    pub async fn connect(config: IdentityProviderConfig) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;

        let session = Self::admin_login(&http, &config).await.map_err(|e| {
            tracing::error!(
                base_url = %config.base_url,
                realm = %config.admin_realm,
                error = %e,
                "Initial admin login failed"
            );
            e
        })?;

        tracing::info!(
            base_url = %config.base_url,
            realm = %config.realm,
            "Identity provider admin session established"
        );

        Ok(Self {
            http,
            config,
            session: RwLock::new(session),
        })
    }

    async fn admin_login(
        http: &Client,
        config: &IdentityProviderConfig,
    ) -> Result<AdminSession, ProviderError> {
        let url = format!(
            "{}/realms/{}/protocol/openid-connect/token",
            config.base_url, config.admin_realm
        );
        let response = http
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", config.admin_client_id.as_str()),
                ("username", config.admin_username.as_str()),
                ("password", config.admin_password.expose_secret().as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Session(format!(
                "admin login returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await?;
        Ok(AdminSession::issued(
            token.access_token,
            Duration::from_secs(token.expires_in),
            config.token_refresh_margin(),
        ))
    }

    /// Current admin token, renewed first once it is inside the refresh
    /// margin.
    async fn admin_token(&self) -> Result<String, ProviderError> {
        {
            let session = self.session.read().await;
            if !session.needs_refresh() {
                return Ok(session.access_token.clone());
            }
        }

        let mut session = self.session.write().await;

        // Another task may have renewed it while we waited for the lock.
        if !session.needs_refresh() {
            return Ok(session.access_token.clone());
        }

        match Self::admin_login(&self.http, &self.config).await {
            Ok(renewed) => {
                tracing::info!(
                    refresh_in_secs = renewed
                        .refresh_at
                        .saturating_duration_since(Instant::now())
                        .as_secs(),
                    "Admin token refreshed"
                );
                *session = renewed;
                Ok(session.access_token.clone())
            }
            Err(e) => {
                // The stale token is kept; the next call retries.
                tracing::error!(error = %e, "Failed to refresh admin token");
                Err(e)
            }
        }
    }

    /// `{base}/admin/realms/{realm}/{segments...}` with each segment escaped.
    fn admin_url(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| {
            ProviderError::Session(format!("invalid base url {}: {}", self.config.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::Session(format!(
                    "base url cannot carry a path: {}",
                    self.config.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["admin", "realms", self.config.realm.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn realm_endpoint(&self, endpoint: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/{}",
            self.config.base_url, self.config.realm, endpoint
        )
    }

    async fn admin_request(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<RequestBuilder, ProviderError> {
        let token = self.admin_token().await?;
        let url = self.admin_url(segments)?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn find_realm_role(&self, role_name: &str) -> Result<RoleRepresentation, ProviderError> {
        let response = self
            .admin_request(Method::GET, &["roles", role_name])
            .await?
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ProviderError::RoleNotFound(role_name.to_string())),
            s if s.is_success() => Ok(response.json().await?),
            _ => Err(api_error(response).await),
        }
    }

    async fn change_role_mapping(
        &self,
        method: Method,
        id: &str,
        role_name: &str,
    ) -> Result<(), ProviderError> {
        let role = self.find_realm_role(role_name).await?;
        let response = self
            .admin_request(method, &["users", id, "role-mappings", "realm"])
            .await?
            .json(&json!([{ "id": role.id, "name": role.name }]))
            .send()
            .await?;
        expect_success(response, || ProviderError::NotFound(id.to_string())).await
    }

    async fn token_grant(&self, form: &[(&str, &str)]) -> Result<UserToken, ProviderError> {
        let response = self
            .http
            .post(self.realm_endpoint("token"))
            .form(form)
            .send()
            .await?;
        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(ProviderError::InvalidCredentials)
            }
            s if s.is_success() => Ok(response.json().await?),
            _ => Err(api_error(response).await),
        }
    }
}

async fn api_error(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    ProviderError::Api { status, message }
}

async fn expect_success(
    response: Response,
    not_found: impl FnOnce() -> ProviderError,
) -> Result<(), ProviderError> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(not_found()),
        s if s.is_success() => Ok(()),
        _ => Err(api_error(response).await),
    }
}

#[async_trait]
impl IdentityProvider for KeycloakClient {
    #[instrument(skip(self, account), fields(username = %account.username))]
    async fn create_account(&self, account: &NewAccount) -> Result<String, ProviderError> {
        require(&account.username, "username")?;
        require(&account.email, "email")?;

        let response = self
            .admin_request(Method::POST, &["users"])
            .await?
            .json(account)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(ProviderError::AlreadyExists(account.username.clone())),
            StatusCode::CREATED => response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| location.rsplit('/').next())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ProviderError::Api {
                    status: StatusCode::CREATED.as_u16(),
                    message: "account created without a Location header".to_string(),
                }),
            _ => Err(api_error(response).await),
        }
    }

    #[instrument(skip(self))]
    async fn get_account_by_email(&self, email: &str) -> Result<Account, ProviderError> {
        require(email, "email")?;

        let response = self
            .admin_request(Method::GET, &["users"])
            .await?
            .query(&[("email", email), ("exact", "true")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let accounts: Vec<Account> = response.json().await?;
        accounts
            .into_iter()
            .find(|a| a.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .ok_or_else(|| ProviderError::NotFound(email.to_string()))
    }

    #[instrument(skip(self))]
    async fn get_account_by_id(&self, id: &str) -> Result<Account, ProviderError> {
        require(id, "id")?;

        let response = self
            .admin_request(Method::GET, &["users", id])
            .await?
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(id.to_string())),
            s if s.is_success() => Ok(response.json().await?),
            _ => Err(api_error(response).await),
        }
    }

    #[instrument(skip(self, account), fields(id = %account.id))]
    async fn update_account(&self, account: &Account) -> Result<(), ProviderError> {
        require(&account.id, "id")?;

        let response = self
            .admin_request(Method::PUT, &["users", &account.id])
            .await?
            .json(account)
            .send()
            .await?;
        expect_success(response, || ProviderError::NotFound(account.id.clone())).await
    }

    #[instrument(skip(self, secret))]
    async fn set_credential(
        &self,
        id: &str,
        secret: &Secret<String>,
        temporary: bool,
    ) -> Result<(), ProviderError> {
        require(id, "id")?;
        require(secret.expose_secret(), "secret")?;

        let response = self
            .admin_request(Method::PUT, &["users", id, "reset-password"])
            .await?
            .json(&json!({
                "type": "password",
                "value": secret.expose_secret(),
                "temporary": temporary,
            }))
            .send()
            .await?;
        expect_success(response, || ProviderError::NotFound(id.to_string())).await
    }

    #[instrument(skip(self))]
    async fn assign_role(&self, id: &str, role_name: &str) -> Result<(), ProviderError> {
        require(id, "id")?;
        require(role_name, "role_name")?;
        self.change_role_mapping(Method::POST, id, role_name).await
    }

    #[instrument(skip(self))]
    async fn remove_role(&self, id: &str, role_name: &str) -> Result<(), ProviderError> {
        require(id, "id")?;
        require(role_name, "role_name")?;
        self.change_role_mapping(Method::DELETE, id, role_name).await
    }

    #[instrument(skip(self))]
    async fn list_roles(&self, id: &str) -> Result<Vec<String>, ProviderError> {
        require(id, "id")?;

        let response = self
            .admin_request(Method::GET, &["users", id, "role-mappings", "realm"])
            .await?
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(id.to_string())),
            s if s.is_success() => {
                let roles: Vec<RoleRepresentation> = response.json().await?;
                Ok(roles.into_iter().map(|r| r.name).collect())
            }
            _ => Err(api_error(response).await),
        }
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, id: &str) -> Result<(), ProviderError> {
        require(id, "id")?;

        let response = self
            .admin_request(Method::DELETE, &["users", id])
            .await?
            .send()
            .await?;
        expect_success(response, || ProviderError::NotFound(id.to_string())).await
    }

    #[instrument(skip(self, password))]
    async fn login(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> Result<UserToken, ProviderError> {
        require(username, "username")?;
        require(password.expose_secret(), "password")?;

        self.token_grant(&[
            ("grant_type", "password"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
            ("username", username),
            ("password", password.expose_secret().as_str()),
            ("scope", "openid"),
        ])
        .await
    }

    #[instrument(skip(self, refresh_token))]
    async fn refresh_token(&self, refresh_token: &str) -> Result<UserToken, ProviderError> {
        require(refresh_token, "refresh_token")?;

        self.token_grant(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret().as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    #[instrument(skip(self, refresh_token))]
    async fn logout(&self, refresh_token: &str) -> Result<(), ProviderError> {
        require(refresh_token, "refresh_token")?;

        let response = self
            .http
            .post(self.realm_endpoint("logout"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret().as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;
        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                Err(ProviderError::InvalidCredentials)
            }
            s if s.is_success() => Ok(()),
            _ => Err(api_error(response).await),
        }
    }
}
