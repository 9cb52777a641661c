//! Local system of record for persons.
//!
//! [`PgPersonStore`] is the PostgreSQL adapter; [`InMemoryPersonStore`] honours
//! the same contract for tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::StoreError;
use crate::models::{Person, PersonRow};

/// Storage contract consumed by the registration core. Every operation is
/// atomic for a single row.
#[async_trait]
pub trait PersonStore: Send + Sync {
    /// Insert a new person. A taken email surfaces as [`StoreError::DuplicateKey`].
    async fn save(&self, person: &Person) -> Result<(), StoreError>;
    async fn get_by_email(&self, email: &str) -> Result<Person, StoreError>;
    async fn get_by_id(&self, id: &str) -> Result<Person, StoreError>;
    /// Set only the external identity id.
    async fn patch_external_id(&self, id: &str, external_id: &str) -> Result<(), StoreError>;
    async fn update(&self, person: &Person) -> Result<(), StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    async fn health_check(&self) -> Result<(), StoreError>;
}

const PERSON_COLUMNS: &str = "id, identity_number, first_name, last_name, second_last_name, \
    email, phone_number, email_verified, phone_number_verified, password_hash, role, \
    external_id, created_utc";

/// PostgreSQL-backed person store.
#[derive(Clone)]
pub struct PgPersonStore {
    pool: PgPool,
}

impl PgPersonStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersonStore for PgPersonStore {
    async fn save(&self, person: &Person) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO persons (id, identity_number, first_name, last_name, second_last_name,
                                 email, phone_number, email_verified, phone_number_verified,
                                 password_hash, role, external_id, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            "#,
        )
        .bind(&person.id)
        .bind(&person.identity_number)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.second_last_name)
        .bind(&person.email)
        .bind(&person.phone_number)
        .bind(person.email_verified)
        .bind(person.phone_number_verified)
        .bind(&person.password_hash)
        .bind(&person.role)
        .bind(&person.external_id)
        .bind(person.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let err = StoreError::from(e);
            if !matches!(err, StoreError::DuplicateKey) {
                tracing::error!(person_id = %person.id, error = %err, "Failed to insert person");
            }
            err
        })?;
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Person, StoreError> {
        sqlx::query_as::<_, PersonRow>(&format!(
            "SELECT {} FROM persons WHERE email = $1",
            PERSON_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(Person::from)
        .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: &str) -> Result<Person, StoreError> {
        sqlx::query_as::<_, PersonRow>(&format!(
            "SELECT {} FROM persons WHERE id = $1",
            PERSON_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Person::from)
        .ok_or(StoreError::NotFound)
    }

    async fn patch_external_id(&self, id: &str, external_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE persons SET external_id = $1, updated_utc = $2 WHERE id = $3",
        )
        .bind(external_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update(&self, person: &Person) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE persons
            SET identity_number = $1, first_name = $2, last_name = $3, second_last_name = $4,
                email = $5, phone_number = $6, email_verified = $7, phone_number_verified = $8,
                role = $9, external_id = $10, updated_utc = $11
            WHERE id = $12
            "#,
        )
        .bind(&person.identity_number)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.second_last_name)
        .bind(&person.email)
        .bind(&person.phone_number)
        .bind(person.email_verified)
        .bind(person.phone_number_verified)
        .bind(&person.role)
        .bind(&person.external_id)
        .bind(Utc::now())
        .bind(&person.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM persons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            StoreError::Database(anyhow::anyhow!("Database health check failed: {}", e))
        })?;
        Ok(())
    }
}

/// Store operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Save,
    GetByEmail,
    GetById,
    PatchExternalId,
    Update,
    Delete,
}

/// In-memory person store.
///
/// Email uniqueness is checked and the row inserted under one lock, so two
/// concurrent saves with the same email cannot both succeed.
#[derive(Default)]
pub struct InMemoryPersonStore {
    rows: Mutex<HashMap<String, Person>>,
    failing: Mutex<HashSet<StoreOperation>>,
}

impl InMemoryPersonStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to `operation` fail with a database error.
    pub fn fail(&self, operation: StoreOperation) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    pub fn recover(&self, operation: StoreOperation) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&operation);
        }
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored rows carrying `email`.
    pub fn count_by_email(&self, email: &str) -> usize {
        self.rows
            .lock()
            .map(|rows| rows.values().filter(|p| p.email == email).count())
            .unwrap_or(0)
    }

    fn check(&self, operation: StoreOperation) -> Result<(), StoreError> {
        let failing = self
            .failing
            .lock()
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Store mutex poisoned: {}", e)))?;
        if failing.contains(&operation) {
            return Err(StoreError::Database(anyhow::anyhow!(
                "injected failure on {:?}",
                operation
            )));
        }
        Ok(())
    }

    fn rows(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Person>>, StoreError> {
        self.rows
            .lock()
            .map_err(|e| StoreError::Database(anyhow::anyhow!("Store mutex poisoned: {}", e)))
    }
}

#[async_trait]
impl PersonStore for InMemoryPersonStore {
    async fn save(&self, person: &Person) -> Result<(), StoreError> {
        self.check(StoreOperation::Save)?;
        let mut rows = self.rows()?;
        if rows.contains_key(&person.id) || rows.values().any(|p| p.email == person.email) {
            return Err(StoreError::DuplicateKey);
        }
        let mut stored = person.clone();
        stored.clear_password();
        rows.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn get_by_email(&self, email: &str) -> Result<Person, StoreError> {
        self.check(StoreOperation::GetByEmail)?;
        self.rows()?
            .values()
            .find(|p| p.email == email)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_by_id(&self, id: &str) -> Result<Person, StoreError> {
        self.check(StoreOperation::GetById)?;
        self.rows()?.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn patch_external_id(&self, id: &str, external_id: &str) -> Result<(), StoreError> {
        self.check(StoreOperation::PatchExternalId)?;
        let mut rows = self.rows()?;
        let person = rows.get_mut(id).ok_or(StoreError::NotFound)?;
        person.external_id = Some(external_id.to_string());
        Ok(())
    }

    async fn update(&self, person: &Person) -> Result<(), StoreError> {
        self.check(StoreOperation::Update)?;
        let mut rows = self.rows()?;
        if rows
            .values()
            .any(|p| p.id != person.id && p.email == person.email)
        {
            return Err(StoreError::DuplicateKey);
        }
        let existing = rows.get_mut(&person.id).ok_or(StoreError::NotFound)?;
        let password_hash = std::mem::take(&mut existing.password_hash);
        *existing = person.clone();
        existing.password_hash = password_hash;
        existing.clear_password();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.check(StoreOperation::Delete)?;
        self.rows()?
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn person(email: &str) -> Person {
        let mut p = Person::new(
            "123",
            "Ana",
            "Gomez",
            email,
            Secret::new("pw".to_string()),
            "user",
        );
        p.assign_id();
        p.password_hash = "$argon2id$fake".to_string();
        p
    }

    #[tokio::test]
    async fn save_rejects_duplicate_email() {
        let store = InMemoryPersonStore::new();
        store.save(&person("a@x.com")).await.unwrap();

        let err = store.save(&person("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn email_match_is_case_sensitive() {
        let store = InMemoryPersonStore::new();
        store.save(&person("a@x.com")).await.unwrap();
        store.save(&person("A@x.com")).await.unwrap();
        assert!(matches!(
            store.get_by_email("a@X.com").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn patch_external_id_on_missing_row_is_not_found() {
        let store = InMemoryPersonStore::new();
        let err = store.patch_external_id("missing", "kc-1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn update_keeps_stored_password_hash() {
        let store = InMemoryPersonStore::new();
        let mut p = person("a@x.com");
        store.save(&p).await.unwrap();

        p.role = "admin".to_string();
        p.password_hash = String::new();
        store.update(&p).await.unwrap();

        let stored = store.get_by_id(&p.id).await.unwrap();
        assert_eq!(stored.role, "admin");
        assert_eq!(stored.password_hash, "$argon2id$fake");
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found() {
        let store = InMemoryPersonStore::new();
        let p = person("a@x.com");
        store.save(&p).await.unwrap();
        store.delete(&p.id).await.unwrap();
        assert!(matches!(store.delete(&p.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_database_error() {
        let store = InMemoryPersonStore::new();
        store.fail(StoreOperation::Save);
        assert!(matches!(
            store.save(&person("a@x.com")).await,
            Err(StoreError::Database(_))
        ));
        store.recover(StoreOperation::Save);
        assert!(store.save(&person("a@x.com")).await.is_ok());
    }
}
