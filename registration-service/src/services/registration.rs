//! Registration saga.
//!
//! Steps, in order: assign identifier, persist locally, sync to the identity
//! provider, provision the credential, assign the role, link the external id
//! back to the local row. Each step commits on its own; a failure undoes the
//! completed ones in reverse.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

use super::saga::{Saga, SagaFailure, SagaStep, StepTimedOut};
use super::{AuthorizationService, PersonStore, ProviderError, ServiceError, StoreError};
use crate::models::{Person, SagaResult};
use crate::utils::hash_password;

pub const STEP_ASSIGN_IDENTIFIER: &str = "assign_identifier";
pub const STEP_PERSIST_PERSON: &str = "persist_person";
pub const STEP_SYNC_TO_PROVIDER: &str = "sync_to_provider";
pub const STEP_PROVISION_CREDENTIAL: &str = "provision_credential";
pub const STEP_ASSIGN_ROLE: &str = "assign_role";
pub const STEP_LINK_EXTERNAL_ID: &str = "link_external_id";

/// Why a registration step failed.
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    TimedOut(#[from] StepTimedOut),
}

/// State threaded through the registration steps.
#[derive(Debug)]
pub struct RegistrationContext {
    pub person: Person,
    pub external_id: Option<String>,
}

impl RegistrationContext {
    fn external_id(&self) -> Result<&str, StepFailure> {
        self.external_id
            .as_deref()
            .ok_or(StepFailure::Provider(ProviderError::InvalidArgument(
                "external_id",
            )))
    }
}

struct AssignIdentifier;

#[async_trait]
impl SagaStep<RegistrationContext, StepFailure> for AssignIdentifier {
    fn name(&self) -> &'static str {
        STEP_ASSIGN_IDENTIFIER
    }

    async fn execute(&self, ctx: &mut RegistrationContext) -> Result<(), StepFailure> {
        ctx.person.assign_id();
        Ok(())
    }
}

struct PersistPerson {
    store: Arc<dyn PersonStore>,
}

#[async_trait]
impl SagaStep<RegistrationContext, StepFailure> for PersistPerson {
    fn name(&self) -> &'static str {
        STEP_PERSIST_PERSON
    }

    async fn execute(&self, ctx: &mut RegistrationContext) -> Result<(), StepFailure> {
        ctx.person.password_hash =
            hash_password(&ctx.person.password).map_err(|e| StepFailure::Hashing(e.to_string()))?;
        self.store.save(&ctx.person).await?;
        Ok(())
    }

    async fn compensate(&self, ctx: &RegistrationContext) -> Result<(), StepFailure> {
        // A timed-out save may never have landed.
        match self.store.delete(&ctx.person.id).await {
            Ok(()) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct SyncToProvider {
    authz: AuthorizationService,
}

#[async_trait]
impl SagaStep<RegistrationContext, StepFailure> for SyncToProvider {
    fn name(&self) -> &'static str {
        STEP_SYNC_TO_PROVIDER
    }

    async fn execute(&self, ctx: &mut RegistrationContext) -> Result<(), StepFailure> {
        let external_id = self.authz.sync_to_provider(&ctx.person).await?;
        ctx.external_id = Some(external_id);
        Ok(())
    }

    async fn compensate(&self, ctx: &RegistrationContext) -> Result<(), StepFailure> {
        let external_id = match &ctx.external_id {
            Some(id) => id.clone(),
            // Timed out before the id came back: the account may exist anyway.
            None => match self
                .authz
                .provider()
                .get_account_by_email(&ctx.person.email)
                .await
            {
                Ok(account) => account.id,
                Err(ProviderError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            },
        };
        self.authz
            .delete_from_provider(&ctx.person.id, &external_id)
            .await?;
        Ok(())
    }
}

struct ProvisionCredential {
    authz: AuthorizationService,
}

#[async_trait]
impl SagaStep<RegistrationContext, StepFailure> for ProvisionCredential {
    fn name(&self) -> &'static str {
        STEP_PROVISION_CREDENTIAL
    }

    async fn execute(&self, ctx: &mut RegistrationContext) -> Result<(), StepFailure> {
        let external_id = ctx.external_id()?;
        self.authz
            .set_credential(external_id, &ctx.person.password, false)
            .await?;
        Ok(())
    }
}

struct AssignRole {
    authz: AuthorizationService,
}

#[async_trait]
impl SagaStep<RegistrationContext, StepFailure> for AssignRole {
    fn name(&self) -> &'static str {
        STEP_ASSIGN_ROLE
    }

    async fn execute(&self, ctx: &mut RegistrationContext) -> Result<(), StepFailure> {
        let external_id = ctx.external_id()?;
        self.authz
            .grant_account_role(external_id, &ctx.person.role)
            .await?;
        Ok(())
    }
}

struct LinkExternalId {
    store: Arc<dyn PersonStore>,
}

#[async_trait]
impl SagaStep<RegistrationContext, StepFailure> for LinkExternalId {
    fn name(&self) -> &'static str {
        STEP_LINK_EXTERNAL_ID
    }

    async fn execute(&self, ctx: &mut RegistrationContext) -> Result<(), StepFailure> {
        let external_id = ctx.external_id()?.to_string();
        self.store
            .patch_external_id(&ctx.person.id, &external_id)
            .await?;
        ctx.person.external_id = Some(external_id);
        Ok(())
    }
}

/// Registers persons locally and in the identity provider.
pub struct RegistrationOrchestrator {
    store: Arc<dyn PersonStore>,
    saga: Saga<RegistrationContext, StepFailure>,
}

impl RegistrationOrchestrator {
    pub fn new(
        store: Arc<dyn PersonStore>,
        authz: AuthorizationService,
        step_timeout: Duration,
    ) -> Self {
        let saga = Saga::new("registration", step_timeout)
            .step(AssignIdentifier)
            .step(PersistPerson {
                store: store.clone(),
            })
            .step(SyncToProvider {
                authz: authz.clone(),
            })
            .step(ProvisionCredential {
                authz: authz.clone(),
            })
            .step(AssignRole { authz })
            .step(LinkExternalId {
                store: store.clone(),
            });

        Self { store, saga }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.saga.step_names()
    }

    /// Register `person`. Returns the linked person with the plaintext
    /// password cleared, or a classified error after compensation.
    #[instrument(skip(self, person), fields(email = %person.email, role = %person.role))]
    pub async fn register(&self, person: Person) -> Result<SagaResult, ServiceError> {
        match self.store.get_by_email(&person.email).await {
            Ok(_) => return Err(ServiceError::AlreadyRegistered),
            Err(StoreError::NotFound) => {}
            // The unique constraint still guards the insert.
            Err(e) => tracing::warn!(error = %e, "Duplicate pre-check failed, continuing"),
        }

        if person.role.trim().is_empty() {
            return Err(ServiceError::RoleRequired);
        }

        let mut ctx = RegistrationContext {
            person,
            external_id: None,
        };

        if let Err(SagaFailure { step, error }) = self.saga.run(&mut ctx).await {
            return Err(classify(step, error));
        }

        let mut person = ctx.person;
        person.clear_password();

        tracing::info!(
            person_id = %person.id,
            external_id = person.external_id.as_deref().unwrap_or_default(),
            "Person registered"
        );

        Ok(SagaResult {
            person,
            message: "Person registered successfully".to_string(),
        })
    }
}

fn classify(step: &'static str, error: StepFailure) -> ServiceError {
    match error {
        // Lost the race with a concurrent registration of the same email.
        StepFailure::Store(StoreError::DuplicateKey) if step == STEP_PERSIST_PERSON => {
            ServiceError::AlreadyRegistered
        }
        source => ServiceError::RegistrationFailed { step, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryPersonStore, MockIdentityProvider};
    use secrecy::{ExposeSecret, Secret};

    fn orchestrator() -> RegistrationOrchestrator {
        let store: Arc<dyn PersonStore> = Arc::new(InMemoryPersonStore::new());
        let provider = Arc::new(MockIdentityProvider::new());
        let authz = AuthorizationService::new(provider, store.clone());
        RegistrationOrchestrator::new(store, authz, Duration::from_secs(5))
    }

    #[test]
    fn steps_are_registered_in_order() {
        assert_eq!(
            orchestrator().step_names(),
            vec![
                STEP_ASSIGN_IDENTIFIER,
                STEP_PERSIST_PERSON,
                STEP_SYNC_TO_PROVIDER,
                STEP_PROVISION_CREDENTIAL,
                STEP_ASSIGN_ROLE,
                STEP_LINK_EXTERNAL_ID,
            ]
        );
    }

    #[test]
    fn duplicate_key_on_persist_is_already_registered() {
        let err = classify(STEP_PERSIST_PERSON, StepFailure::Store(StoreError::DuplicateKey));
        assert!(matches!(err, ServiceError::AlreadyRegistered));
    }

    #[test]
    fn other_failures_keep_the_step() {
        let err = classify(
            STEP_LINK_EXTERNAL_ID,
            StepFailure::Store(StoreError::NotFound),
        );
        assert!(matches!(
            err,
            ServiceError::RegistrationFailed {
                step: STEP_LINK_EXTERNAL_ID,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn successful_registration_clears_the_plaintext_password() {
        let person = Person::new(
            "1020304050",
            "Ana",
            "Gomez",
            "ana@example.com",
            Secret::new("S3cret!pass".to_string()),
            "user",
        );

        let result = orchestrator().register(person).await.unwrap();

        assert!(result.person.password.expose_secret().is_empty());
        assert!(!result.person.password_hash.is_empty());
        assert!(result.person.is_synced());
    }
}
