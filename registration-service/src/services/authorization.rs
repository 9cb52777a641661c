//! Maps local persons onto identity provider accounts and their roles.

use dashmap::DashMap;
use secrecy::Secret;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use super::{IdentityProvider, NewAccount, PersonStore, ProviderError, ServiceError};
use crate::models::Person;

/// A resource/action pair. `*` matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub resource: String,
    pub action: String,
}

impl Grant {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == "*" || self.resource == resource)
            && (self.action == "*" || self.action == action)
    }
}

/// Fixed role to permission table.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    grants: HashMap<String, Vec<Grant>>,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::empty()
            .grant("admin", Grant::new("*", "*"))
            .grant("moderator", Grant::new("users", "read"))
            .grant("moderator", Grant::new("users", "update"))
            .grant("user", Grant::new("profile", "read"))
    }
}

impl PermissionPolicy {
    pub fn empty() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    pub fn grant(mut self, role: impl Into<String>, grant: Grant) -> Self {
        self.grants.entry(role.into()).or_default().push(grant);
        self
    }

    /// True when any of `roles` grants `action` on `resource`.
    pub fn allows<S: AsRef<str>>(&self, roles: &[S], resource: &str, action: &str) -> bool {
        roles.iter().any(|role| {
            self.grants
                .get(role.as_ref())
                .is_some_and(|grants| grants.iter().any(|g| g.matches(resource, action)))
        })
    }
}

/// Keeps persons and identity provider accounts in step.
///
/// The person-to-account cache is a process-lifetime shortcut only; misses
/// fall back to the store and the provider.
#[derive(Clone)]
pub struct AuthorizationService {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn PersonStore>,
    account_cache: Arc<DashMap<String, String>>,
    policy: PermissionPolicy,
}

impl AuthorizationService {
    pub fn new(provider: Arc<dyn IdentityProvider>, store: Arc<dyn PersonStore>) -> Self {
        Self::with_policy(provider, store, PermissionPolicy::default())
    }

    pub fn with_policy(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn PersonStore>,
        policy: PermissionPolicy,
    ) -> Self {
        Self {
            provider,
            store,
            account_cache: Arc::new(DashMap::new()),
            policy,
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// Cached external id for a person, if any.
    pub fn cached_external_id(&self, person_id: &str) -> Option<String> {
        self.account_cache.get(person_id).map(|e| e.value().clone())
    }

    /// Ensure `person` has an account and return its id.
    ///
    /// An already linked person is returned as is without calling out. When
    /// creation fails the account is looked up by email; if that fails too
    /// the creation error is returned.
    #[instrument(skip(self, person), fields(person_id = %person.id))]
    pub async fn sync_to_provider(&self, person: &Person) -> Result<String, ProviderError> {
        if let Some(external_id) = person.external_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(external_id.to_string());
        }
        if let Some(external_id) = self.cached_external_id(&person.id) {
            return Ok(external_id);
        }

        let external_id = match self
            .provider
            .create_account(&NewAccount::for_person(person))
            .await
        {
            Ok(id) => {
                tracing::info!(external_id = %id, "Identity provider account created");
                id
            }
            Err(create_err) => {
                tracing::warn!(
                    error = %create_err,
                    "Account creation failed, resolving existing account by email"
                );
                match self.provider.get_account_by_email(&person.email).await {
                    Ok(account) => {
                        tracing::info!(external_id = %account.id, "Resolved existing account");
                        account.id
                    }
                    Err(lookup_err) => {
                        tracing::warn!(error = %lookup_err, "Fallback lookup by email failed");
                        return Err(create_err);
                    }
                }
            }
        };

        if !person.id.is_empty() {
            self.account_cache
                .insert(person.id.clone(), external_id.clone());
        }
        Ok(external_id)
    }

    /// Set the account password.
    pub async fn set_credential(
        &self,
        external_id: &str,
        secret: &Secret<String>,
        temporary: bool,
    ) -> Result<(), ProviderError> {
        self.provider
            .set_credential(external_id, secret, temporary)
            .await
    }

    /// Bind a role to an already resolved account.
    pub async fn grant_account_role(
        &self,
        external_id: &str,
        role_name: &str,
    ) -> Result<(), ProviderError> {
        self.provider.assign_role(external_id, role_name).await
    }

    /// Delete the account and forget any cached mapping for `person_id`.
    #[instrument(skip(self))]
    pub async fn delete_from_provider(
        &self,
        person_id: &str,
        external_id: &str,
    ) -> Result<(), ProviderError> {
        self.account_cache.remove(person_id);
        self.provider.delete_account(external_id).await
    }

    /// Person id to external id: cache, then store, then provider sync.
    pub async fn resolve_external_id(&self, person_id: &str) -> Result<String, ServiceError> {
        if let Some(external_id) = self.cached_external_id(person_id) {
            return Ok(external_id);
        }

        let person = self.store.get_by_id(person_id).await?;
        let external_id = match person.external_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self.sync_to_provider(&person).await?,
        };
        self.account_cache
            .insert(person_id.to_string(), external_id.clone());
        Ok(external_id)
    }

    /// Grant `role_name` to a registered person and record it locally.
    ///
    /// The provider holds the authoritative binding; failing to persist the
    /// role locally is logged and does not fail the call.
    #[instrument(skip(self))]
    pub async fn assign_role(&self, person_id: &str, role_name: &str) -> Result<(), ServiceError> {
        if role_name.trim().is_empty() {
            return Err(ServiceError::RoleRequired);
        }

        let external_id = self.resolve_external_id(person_id).await?;
        self.provider.assign_role(&external_id, role_name).await?;

        match self.store.get_by_id(person_id).await {
            Ok(mut person) => {
                person.role = role_name.to_string();
                person.external_id = Some(external_id);
                if let Err(e) = self.store.update(&person).await {
                    tracing::warn!(error = %e, "Role assigned remotely but not persisted locally");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Role assigned remotely but person could not be reloaded");
            }
        }

        tracing::info!(role = %role_name, "Role assigned");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_role(&self, person_id: &str, role_name: &str) -> Result<(), ServiceError> {
        if role_name.trim().is_empty() {
            return Err(ServiceError::RoleRequired);
        }
        let external_id = self.resolve_external_id(person_id).await?;
        self.provider.remove_role(&external_id, role_name).await?;
        tracing::info!(role = %role_name, "Role removed");
        Ok(())
    }

    pub async fn list_roles(&self, person_id: &str) -> Result<Vec<String>, ServiceError> {
        let external_id = self.resolve_external_id(person_id).await?;
        Ok(self.provider.list_roles(&external_id).await?)
    }

    pub async fn has_role(&self, person_id: &str, role_name: &str) -> Result<bool, ServiceError> {
        let roles = self.list_roles(person_id).await?;
        Ok(roles.iter().any(|r| r == role_name))
    }

    pub async fn has_permission(
        &self,
        person_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, ServiceError> {
        let roles = self.list_roles(person_id).await?;
        Ok(self.policy.allows(&roles, resource, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_is_granted_everything() {
        let policy = PermissionPolicy::default();
        assert!(policy.allows(&["admin"], "invoices", "delete"));
        assert!(policy.allows(&["admin"], "profile", "read"));
    }

    #[test]
    fn moderator_may_read_and_update_users_only() {
        let policy = PermissionPolicy::default();
        assert!(policy.allows(&["moderator"], "users", "read"));
        assert!(policy.allows(&["moderator"], "users", "update"));
        assert!(!policy.allows(&["moderator"], "users", "delete"));
        assert!(!policy.allows(&["moderator"], "profile", "read"));
    }

    #[test]
    fn user_may_read_profile() {
        let policy = PermissionPolicy::default();
        assert!(policy.allows(&["user"], "profile", "read"));
        assert!(!policy.allows(&["user"], "profile", "update"));
    }

    #[test]
    fn roles_are_combined() {
        let policy = PermissionPolicy::default();
        let roles = vec!["user".to_string(), "moderator".to_string()];
        assert!(policy.allows(&roles, "profile", "read"));
        assert!(policy.allows(&roles, "users", "update"));
    }

    #[test]
    fn unknown_or_missing_roles_grant_nothing() {
        let policy = PermissionPolicy::default();
        assert!(!policy.allows(&["auditor"], "profile", "read"));
        assert!(!policy.allows::<&str>(&[], "profile", "read"));
    }

    #[test]
    fn custom_policy_replaces_the_default_table() {
        let policy = PermissionPolicy::empty().grant("auditor", Grant::new("ledger", "*"));
        assert!(policy.allows(&["auditor"], "ledger", "export"));
        assert!(!policy.allows(&["admin"], "ledger", "export"));
    }
}
