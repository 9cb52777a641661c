use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Person, SagaResult};

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPersonRequest {
    #[validate(length(min = 1, message = "Identity number is required"))]
    pub identity_number: String,

    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    pub last_name: String,

    #[serde(default)]
    #[validate(length(max = 100))]
    pub second_last_name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone_number: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    /// Checked by the registration itself so a missing role is reported as
    /// `ROLE_REQUIRED`.
    #[serde(default)]
    pub role: String,
}

impl RegisterPersonRequest {
    pub fn into_person(self) -> Person {
        let mut person = Person::new(
            self.identity_number,
            self.first_name,
            self.last_name,
            self.email,
            Secret::new(self.password),
            self.role,
        );
        person.second_last_name = self.second_last_name;
        person.phone_number = self.phone_number;
        person
    }
}

/// A person as exposed over HTTP. Never carries the password or its hash.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersonResponse {
    pub id: String,
    pub identity_number: String,
    pub first_name: String,
    pub last_name: String,
    pub second_last_name: String,
    pub email: String,
    pub phone_number: String,
    pub email_verified: bool,
    pub phone_number_verified: bool,
    pub role: String,
    pub external_id: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<Person> for PersonResponse {
    fn from(person: Person) -> Self {
        Self {
            id: person.id,
            identity_number: person.identity_number,
            first_name: person.first_name,
            last_name: person.last_name,
            second_last_name: person.second_last_name,
            email: person.email,
            phone_number: person.phone_number,
            email_verified: person.email_verified,
            phone_number_verified: person.phone_number_verified,
            role: person.role,
            external_id: person.external_id,
            created_utc: person.created_utc,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub person: PersonResponse,
    pub message: String,
}

impl From<SagaResult> for RegistrationResponse {
    fn from(result: SagaResult) -> Self {
        Self {
            person: result.person.into(),
            message: result.message,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role is required"))]
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RolesResponse {
    pub person_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionQuery {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleCheckResponse {
    pub person_id: String,
    pub role: String,
    pub has_role: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub person_id: String,
    pub resource: String,
    pub action: String,
    pub allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegisterPersonRequest {
        RegisterPersonRequest {
            identity_number: "1020304050".to_string(),
            first_name: "Ana".to_string(),
            last_name: "Gomez".to_string(),
            second_last_name: "Ruiz".to_string(),
            email: "ana@example.com".to_string(),
            phone_number: "+573001112233".to_string(),
            password: "S3cret!pass".to_string(),
            role: "user".to_string(),
        }
    }

    #[test]
    fn valid_request_passes_validation() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn malformed_email_is_rejected() {
        let req = RegisterPersonRequest {
            email: "not-an-email".to_string(),
            ..request()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn empty_role_is_left_to_the_registration() {
        let req = RegisterPersonRequest {
            role: String::new(),
            ..request()
        };
        assert!(req.validate().is_ok());
        assert!(req.into_person().role.is_empty());
    }

    #[test]
    fn into_person_carries_optional_fields() {
        let person = request().into_person();
        assert_eq!(person.second_last_name, "Ruiz");
        assert_eq!(person.phone_number, "+573001112233");
        assert!(person.id.is_empty());
        assert!(!person.is_synced());
    }

    #[test]
    fn response_omits_password_material() {
        let mut person = request().into_person();
        person.password_hash = "$argon2id$...".to_string();
        let json = serde_json::to_value(PersonResponse::from(person)).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "ana@example.com");
    }
}
