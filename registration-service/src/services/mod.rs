//! Services layer for registration-service.
//!
//! The person store and identity provider sit behind traits so the
//! registration saga and authorization logic run against either the real
//! adapters or the in-memory ones.

mod authorization;
pub mod error;
mod identity_provider;
mod keycloak;
mod person_store;
pub mod registration;
pub mod saga;
mod session;

pub use authorization::{AuthorizationService, Grant, PermissionPolicy};
pub use error::{ErrorKind, ProviderError, ServiceError, StoreError};
pub use identity_provider::{
    Account, IdentityProvider, MockIdentityProvider, NewAccount, ProviderOperation, UserToken,
};
pub use keycloak::KeycloakClient;
pub use person_store::{InMemoryPersonStore, PersonStore, PgPersonStore, StoreOperation};
pub use registration::{RegistrationOrchestrator, StepFailure};
pub use session::SessionService;
