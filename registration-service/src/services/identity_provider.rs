//! Identity provider contract.
//!
//! [`KeycloakClient`](super::KeycloakClient) talks to a real Keycloak realm;
//! [`MockIdentityProvider`] keeps accounts in memory for tests.

use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::ProviderError;
use crate::models::Person;

/// Minimal profile used to provision a remote account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub enabled: bool,
    pub email_verified: bool,
}

impl NewAccount {
    /// Profile for `person`: the email doubles as the username.
    pub fn for_person(person: &Person) -> Self {
        Self {
            username: person.email.clone(),
            email: person.email.clone(),
            first_name: person.first_name.clone(),
            last_name: person.last_name.clone(),
            enabled: true,
            email_verified: person.email_verified,
        }
    }
}

/// Remote account as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub email_verified: bool,
}

/// End-user token set returned by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_expires_in: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Account, credential and role operations against the identity provider.
///
/// Every operation rejects empty required arguments with
/// [`ProviderError::InvalidArgument`] before calling out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provision an account and return its id. Not idempotent: an existing
    /// username fails with [`ProviderError::AlreadyExists`].
    async fn create_account(&self, account: &NewAccount) -> Result<String, ProviderError>;
    async fn get_account_by_email(&self, email: &str) -> Result<Account, ProviderError>;
    async fn get_account_by_id(&self, id: &str) -> Result<Account, ProviderError>;
    async fn update_account(&self, account: &Account) -> Result<(), ProviderError>;
    async fn set_credential(
        &self,
        id: &str,
        secret: &Secret<String>,
        temporary: bool,
    ) -> Result<(), ProviderError>;
    /// Resolve `role_name` in the realm and bind it to the account.
    async fn assign_role(&self, id: &str, role_name: &str) -> Result<(), ProviderError>;
    async fn remove_role(&self, id: &str, role_name: &str) -> Result<(), ProviderError>;
    async fn list_roles(&self, id: &str) -> Result<Vec<String>, ProviderError>;
    async fn delete_account(&self, id: &str) -> Result<(), ProviderError>;
    /// End-user password login, independent of the admin session.
    async fn login(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> Result<UserToken, ProviderError>;
    async fn refresh_token(&self, refresh_token: &str) -> Result<UserToken, ProviderError>;
    async fn logout(&self, refresh_token: &str) -> Result<(), ProviderError>;
}

pub(crate) fn require(value: &str, name: &'static str) -> Result<(), ProviderError> {
    if value.trim().is_empty() {
        return Err(ProviderError::InvalidArgument(name));
    }
    Ok(())
}

/// Identity provider operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOperation {
    CreateAccount,
    GetAccountByEmail,
    GetAccountById,
    UpdateAccount,
    SetCredential,
    AssignRole,
    RemoveRole,
    ListRoles,
    DeleteAccount,
    Login,
    RefreshToken,
    Logout,
}

#[derive(Default)]
struct MockRealm {
    accounts: HashMap<String, Account>,
    credentials: HashMap<String, String>,
    bindings: HashMap<String, Vec<String>>,
    roles: HashSet<String>,
    sessions: HashMap<String, String>,
}

/// In-memory identity provider with call counting and fault injection.
pub struct MockIdentityProvider {
    realm: Mutex<MockRealm>,
    failing: Mutex<HashSet<ProviderOperation>>,
    calls: AtomicUsize,
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockIdentityProvider {
    /// Realm with the `admin`, `moderator` and `user` roles defined.
    pub fn new() -> Self {
        Self::with_roles(["admin", "moderator", "user"])
    }

    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let realm = MockRealm {
            roles: roles.into_iter().map(Into::into).collect(),
            ..MockRealm::default()
        };
        Self {
            realm: Mutex::new(realm),
            failing: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail(&self, operation: ProviderOperation) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    pub fn recover(&self, operation: ProviderOperation) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&operation);
        }
    }

    /// Total number of calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn account_count(&self) -> usize {
        self.realm.lock().map(|r| r.accounts.len()).unwrap_or(0)
    }

    /// Seed an account directly, bypassing call counting.
    pub fn insert_account(&self, account: Account) {
        if let Ok(mut realm) = self.realm.lock() {
            realm.accounts.insert(account.id.clone(), account);
        }
    }

    pub fn credential_of(&self, id: &str) -> Option<String> {
        self.realm
            .lock()
            .ok()
            .and_then(|r| r.credentials.get(id).cloned())
    }

    fn enter(&self, operation: ProviderOperation) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing
            .lock()
            .map_err(|e| ProviderError::Session(format!("Mock mutex poisoned: {}", e)))?;
        if failing.contains(&operation) {
            return Err(ProviderError::Api {
                status: 503,
                message: format!("injected failure on {:?}", operation),
            });
        }
        Ok(())
    }

    fn realm(&self) -> Result<std::sync::MutexGuard<'_, MockRealm>, ProviderError> {
        self.realm
            .lock()
            .map_err(|e| ProviderError::Session(format!("Mock mutex poisoned: {}", e)))
    }

    fn issue_token(realm: &mut MockRealm, username: &str) -> UserToken {
        let refresh = Uuid::new_v4().to_string();
        realm.sessions.insert(refresh.clone(), username.to_string());
        UserToken {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Some(refresh),
            expires_in: 300,
            refresh_expires_in: 1800,
            token_type: default_token_type(),
        }
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn create_account(&self, account: &NewAccount) -> Result<String, ProviderError> {
        self.enter(ProviderOperation::CreateAccount)?;
        require(&account.email, "email")?;
        let mut realm = self.realm()?;
        if realm
            .accounts
            .values()
            .any(|a| a.username == account.username)
        {
            return Err(ProviderError::AlreadyExists(account.username.clone()));
        }
        let id = Uuid::new_v4().to_string();
        realm.accounts.insert(
            id.clone(),
            Account {
                id: id.clone(),
                username: account.username.clone(),
                email: Some(account.email.clone()),
                first_name: Some(account.first_name.clone()),
                last_name: Some(account.last_name.clone()),
                enabled: account.enabled,
                email_verified: account.email_verified,
            },
        );
        Ok(id)
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Account, ProviderError> {
        self.enter(ProviderOperation::GetAccountByEmail)?;
        require(email, "email")?;
        self.realm()?
            .accounts
            .values()
            .find(|a| a.email.as_deref() == Some(email))
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(email.to_string()))
    }

    async fn get_account_by_id(&self, id: &str) -> Result<Account, ProviderError> {
        self.enter(ProviderOperation::GetAccountById)?;
        require(id, "id")?;
        self.realm()?
            .accounts
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn update_account(&self, account: &Account) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::UpdateAccount)?;
        require(&account.id, "id")?;
        let mut realm = self.realm()?;
        let existing = realm
            .accounts
            .get_mut(&account.id)
            .ok_or_else(|| ProviderError::NotFound(account.id.clone()))?;
        *existing = account.clone();
        Ok(())
    }

    async fn set_credential(
        &self,
        id: &str,
        secret: &Secret<String>,
        _temporary: bool,
    ) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::SetCredential)?;
        require(id, "id")?;
        require(secret.expose_secret(), "secret")?;
        let mut realm = self.realm()?;
        if !realm.accounts.contains_key(id) {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        realm
            .credentials
            .insert(id.to_string(), secret.expose_secret().clone());
        Ok(())
    }

    async fn assign_role(&self, id: &str, role_name: &str) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::AssignRole)?;
        require(id, "id")?;
        require(role_name, "role_name")?;
        let mut realm = self.realm()?;
        if !realm.roles.contains(role_name) {
            return Err(ProviderError::RoleNotFound(role_name.to_string()));
        }
        if !realm.accounts.contains_key(id) {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        let bound = realm.bindings.entry(id.to_string()).or_default();
        if !bound.iter().any(|r| r == role_name) {
            bound.push(role_name.to_string());
        }
        Ok(())
    }

    async fn remove_role(&self, id: &str, role_name: &str) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::RemoveRole)?;
        require(id, "id")?;
        require(role_name, "role_name")?;
        let mut realm = self.realm()?;
        if !realm.roles.contains(role_name) {
            return Err(ProviderError::RoleNotFound(role_name.to_string()));
        }
        if !realm.accounts.contains_key(id) {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        if let Some(bound) = realm.bindings.get_mut(id) {
            bound.retain(|r| r != role_name);
        }
        Ok(())
    }

    async fn list_roles(&self, id: &str) -> Result<Vec<String>, ProviderError> {
        self.enter(ProviderOperation::ListRoles)?;
        require(id, "id")?;
        let realm = self.realm()?;
        if !realm.accounts.contains_key(id) {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        Ok(realm.bindings.get(id).cloned().unwrap_or_default())
    }

    async fn delete_account(&self, id: &str) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::DeleteAccount)?;
        require(id, "id")?;
        let mut realm = self.realm()?;
        realm
            .accounts
            .remove(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        realm.credentials.remove(id);
        realm.bindings.remove(id);
        Ok(())
    }

    async fn login(
        &self,
        username: &str,
        password: &Secret<String>,
    ) -> Result<UserToken, ProviderError> {
        self.enter(ProviderOperation::Login)?;
        require(username, "username")?;
        require(password.expose_secret(), "password")?;
        let mut realm = self.realm()?;
        let account_id = realm
            .accounts
            .values()
            .find(|a| a.username == username && a.enabled)
            .map(|a| a.id.clone())
            .ok_or(ProviderError::InvalidCredentials)?;
        match realm.credentials.get(&account_id) {
            Some(stored) if stored == password.expose_secret() => {
                Ok(Self::issue_token(&mut realm, username))
            }
            _ => Err(ProviderError::InvalidCredentials),
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<UserToken, ProviderError> {
        self.enter(ProviderOperation::RefreshToken)?;
        require(refresh_token, "refresh_token")?;
        let mut realm = self.realm()?;
        let username = realm
            .sessions
            .remove(refresh_token)
            .ok_or(ProviderError::InvalidCredentials)?;
        Ok(Self::issue_token(&mut realm, &username))
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), ProviderError> {
        self.enter(ProviderOperation::Logout)?;
        require(refresh_token, "refresh_token")?;
        self.realm()?.sessions.remove(refresh_token);
        Ok(())
    }
}
