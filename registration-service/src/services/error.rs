use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

use super::registration::StepFailure;

/// Failures reported by a [`PersonStore`](super::PersonStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// The unique email (or identifier) is already taken.
    #[error("Duplicate identifying attribute")]
    DuplicateKey,

    #[error("Person not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateKey,
            _ => StoreError::Database(anyhow::Error::new(err)),
        }
    }
}

/// Failures reported by an [`IdentityProvider`](super::IdentityProvider).
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid user credentials")]
    InvalidCredentials,

    /// The admin session could not be established or renewed.
    #[error("Admin session error: {0}")]
    Session(String),

    #[error("Identity provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Identity provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Error kinds exposed to callers of the registration core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyRegistered,
    RoleRequired,
    RegistrationFailed,
    ProviderError,
    NotFound,
    StoreError,
    InvalidCredentials,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorKind::RoleRequired => "ROLE_REQUIRED",
            ErrorKind::RegistrationFailed => "REGISTRATION_FAILED",
            ErrorKind::ProviderError => "PROVIDER_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::StoreError => "STORE_ERROR",
            ErrorKind::InvalidCredentials => "INVALID_CREDENTIALS",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::AlreadyRegistered => StatusCode::CONFLICT,
            ErrorKind::RoleRequired => StatusCode::BAD_REQUEST,
            ErrorKind::RegistrationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ProviderError => StatusCode::BAD_GATEWAY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::StoreError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
        }
    }
}

/// Classified errors returned by the registration and authorization services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Person is already registered")]
    AlreadyRegistered,

    #[error("Role is required")]
    RoleRequired,

    #[error("Registration failed at step '{step}': {source}")]
    RegistrationFailed {
        step: &'static str,
        #[source]
        source: StepFailure,
    },

    #[error(transparent)]
    Provider(ProviderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::AlreadyRegistered => ErrorKind::AlreadyRegistered,
            ServiceError::RoleRequired => ErrorKind::RoleRequired,
            ServiceError::RegistrationFailed { .. } => ErrorKind::RegistrationFailed,
            ServiceError::Provider(_) => ErrorKind::ProviderError,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Store(_) => ErrorKind::StoreError,
            ServiceError::InvalidCredentials => ErrorKind::InvalidCredentials,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey => ServiceError::AlreadyRegistered,
            StoreError::NotFound => ServiceError::NotFound("person".to_string()),
            other => ServiceError::Store(other),
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(what) => ServiceError::NotFound(what),
            ProviderError::InvalidCredentials => ServiceError::InvalidCredentials,
            other => ServiceError::Provider(other),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let kind = err.kind();
        // Internal failures keep their cause in the logs, not in the body.
        let details = match &err {
            ServiceError::RegistrationFailed { step, .. } => Some(format!("step: {}", step)),
            _ => None,
        };
        if kind.status().is_server_error() {
            tracing::error!(code = kind.code(), error = %err, "Request failed");
        }
        let message = match &err {
            ServiceError::RegistrationFailed { .. } => "Registration failed".to_string(),
            ServiceError::Store(_) => "Storage failure".to_string(),
            other => other.to_string(),
        };
        AppError::Classified {
            status: kind.status(),
            code: kind.code(),
            message,
            details,
        }
    }
}
