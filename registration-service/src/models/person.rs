//! Person model - the registration subject.

use chrono::{DateTime, Utc};
use secrecy::Secret;
use sqlx::FromRow;
use uuid::Uuid;

/// A person known to the local system of record.
///
/// `password` only ever holds the plaintext between request binding and
/// credential provisioning; what reaches the store is `password_hash`.
#[derive(Debug, Clone)]
pub struct Person {
    pub id: String,
    pub identity_number: String,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: String,
    pub email: String,
    pub phone_number: String,
    pub email_verified: bool,
    pub phone_number_verified: bool,
    pub password: Secret<String>,
    pub password_hash: String,
    pub role: String,
    pub external_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Person {
    /// Create an unsaved person. The identifier is assigned during registration.
    pub fn new(
        identity_number: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        password: Secret<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            identity_number: identity_number.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            second_last_name: String::new(),
            email: email.into(),
            phone_number: String::new(),
            email_verified: false,
            phone_number_verified: false,
            password,
            password_hash: String::new(),
            role: role.into(),
            external_id: None,
            created_utc: Utc::now(),
        }
    }

    /// Assign a fresh identifier.
    pub fn assign_id(&mut self) {
        self.id = Uuid::new_v4().to_string();
    }

    /// True once the identity provider account is linked.
    pub fn is_synced(&self) -> bool {
        self.external_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Drop the plaintext password from memory.
    pub fn clear_password(&mut self) {
        self.password = Secret::new(String::new());
    }
}

/// Row shape of the `persons` table.
#[derive(Debug, Clone, FromRow)]
pub struct PersonRow {
    pub id: String,
    pub identity_number: String,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: String,
    pub email: String,
    pub phone_number: String,
    pub email_verified: bool,
    pub phone_number_verified: bool,
    pub password_hash: String,
    pub role: String,
    pub external_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<PersonRow> for Person {
    fn from(row: PersonRow) -> Self {
        Self {
            id: row.id,
            identity_number: row.identity_number,
            first_name: row.first_name,
            last_name: row.last_name,
            second_last_name: row.second_last_name,
            email: row.email,
            phone_number: row.phone_number,
            email_verified: row.email_verified,
            phone_number_verified: row.phone_number_verified,
            password: Secret::new(String::new()),
            password_hash: row.password_hash,
            role: row.role,
            external_id: row.external_id.filter(|id| !id.is_empty()),
            created_utc: row.created_utc,
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct SagaResult {
    pub person: Person,
    pub message: String,
}
