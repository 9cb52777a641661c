//! AuthorizationService integration tests.

mod common;

use common::{person, TestServices};
use registration_service::services::{
    Account, ProviderError, ProviderOperation, ServiceError, StoreOperation,
};

/// Register a person through the saga and return its local id.
async fn registered(svc: &TestServices, email: &str, role: &str) -> String {
    svc.state
        .registration
        .register(person(email, role))
        .await
        .expect("registration should succeed")
        .person
        .id
}

#[tokio::test]
async fn sync_of_a_linked_person_makes_no_provider_calls() {
    // Arrange
    let svc = TestServices::new();
    let mut linked = person("a@x.com", "user");
    linked.assign_id();
    linked.external_id = Some("kc-42".to_string());

    // Act
    let first = svc.state.authorization.sync_to_provider(&linked).await.unwrap();
    let second = svc.state.authorization.sync_to_provider(&linked).await.unwrap();

    // Assert
    assert_eq!(first, "kc-42");
    assert_eq!(second, "kc-42");
    assert_eq!(svc.provider.call_count(), 0);
}

#[tokio::test]
async fn sync_result_is_cached_per_person() {
    // Arrange
    let svc = TestServices::new();
    let mut unlinked = person("a@x.com", "user");
    unlinked.assign_id();

    // Act
    let first = svc.state.authorization.sync_to_provider(&unlinked).await.unwrap();
    let calls_after_first = svc.provider.call_count();
    let second = svc.state.authorization.sync_to_provider(&unlinked).await.unwrap();

    // Assert
    assert_eq!(first, second);
    assert_eq!(calls_after_first, 1);
    assert_eq!(svc.provider.call_count(), 1);
    assert_eq!(
        svc.state.authorization.cached_external_id(&unlinked.id),
        Some(first)
    );
}

#[tokio::test]
async fn sync_falls_back_to_lookup_by_email() {
    // Arrange
    let svc = TestServices::new();
    svc.provider.insert_account(Account {
        id: "kc-existing".to_string(),
        username: "a@x.com".to_string(),
        email: Some("a@x.com".to_string()),
        first_name: None,
        last_name: None,
        enabled: true,
        email_verified: false,
    });
    let mut unlinked = person("a@x.com", "user");
    unlinked.assign_id();

    // Act
    let external_id = svc.state.authorization.sync_to_provider(&unlinked).await.unwrap();

    // Assert
    assert_eq!(external_id, "kc-existing");
    assert_eq!(svc.provider.account_count(), 1);
}

#[tokio::test]
async fn failed_fallback_returns_the_creation_error() {
    // Arrange
    let svc = TestServices::new();
    svc.provider.fail(ProviderOperation::CreateAccount);
    let mut unlinked = person("a@x.com", "user");
    unlinked.assign_id();

    // Act
    let err = svc
        .state
        .authorization
        .sync_to_provider(&unlinked)
        .await
        .unwrap_err();

    // Assert: the lookup found nothing, the creation error wins
    match err {
        ProviderError::Api { status, message } => {
            assert_eq!(status, 503);
            assert!(message.contains("CreateAccount"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(svc.state.authorization.cached_external_id(&unlinked.id).is_none());
}

#[tokio::test]
async fn assign_role_binds_remotely_and_records_locally() {
    // Arrange
    let svc = TestServices::new();
    let id = registered(&svc, "a@x.com", "user").await;

    // Act
    svc.state
        .authorization
        .assign_role(&id, "moderator")
        .await
        .unwrap();

    // Assert
    let authz = &svc.state.authorization;
    assert!(authz.has_role(&id, "moderator").await.unwrap());
    assert!(authz.has_role(&id, "user").await.unwrap());
    let stored = svc.state.store.get_by_id(&id).await.unwrap();
    assert_eq!(stored.role, "moderator");
    assert!(stored.is_synced());
}

#[tokio::test]
async fn assign_role_survives_a_local_persistence_failure() {
    // Arrange
    let svc = TestServices::new();
    let id = registered(&svc, "a@x.com", "user").await;
    svc.store.fail(StoreOperation::Update);

    // Act
    let result = svc.state.authorization.assign_role(&id, "admin").await;

    // Assert
    assert!(result.is_ok());
    assert!(svc.state.authorization.has_role(&id, "admin").await.unwrap());
    assert_eq!(svc.state.store.get_by_id(&id).await.unwrap().role, "user");
}

#[tokio::test]
async fn assign_role_requires_a_role_name() {
    let svc = TestServices::new();
    let id = registered(&svc, "a@x.com", "user").await;

    let err = svc.state.authorization.assign_role(&id, "").await.unwrap_err();

    assert!(matches!(err, ServiceError::RoleRequired));
}

#[tokio::test]
async fn assign_unknown_role_is_a_provider_error() {
    let svc = TestServices::new();
    let id = registered(&svc, "a@x.com", "user").await;

    let err = svc
        .state
        .authorization
        .assign_role(&id, "auditor")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Provider(ProviderError::RoleNotFound(_))
    ));
}

#[tokio::test]
async fn remove_role_unbinds_it() {
    // Arrange
    let svc = TestServices::new();
    let id = registered(&svc, "a@x.com", "user").await;

    // Act
    svc.state.authorization.remove_role(&id, "user").await.unwrap();

    // Assert
    assert!(svc.state.authorization.list_roles(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn permissions_follow_the_bound_roles() {
    // Arrange
    let svc = TestServices::new();
    let id = registered(&svc, "a@x.com", "user").await;
    let authz = &svc.state.authorization;

    // Act / Assert
    assert!(authz.has_permission(&id, "profile", "read").await.unwrap());
    assert!(!authz.has_permission(&id, "users", "update").await.unwrap());

    authz.assign_role(&id, "moderator").await.unwrap();
    assert!(authz.has_permission(&id, "users", "update").await.unwrap());
    assert!(!authz.has_permission(&id, "users", "delete").await.unwrap());

    authz.assign_role(&id, "admin").await.unwrap();
    assert!(authz.has_permission(&id, "users", "delete").await.unwrap());
}

#[tokio::test]
async fn cache_miss_falls_back_to_the_stored_link() {
    // Arrange
    let svc = TestServices::new();
    let id = registered(&svc, "a@x.com", "user").await;
    let authz = svc.fresh_authorization();
    let accounts = svc.provider.account_count();

    // Act
    let roles = authz.list_roles(&id).await.unwrap();

    // Assert
    assert_eq!(roles, vec!["user"]);
    assert_eq!(svc.provider.account_count(), accounts);
    assert!(authz.cached_external_id(&id).is_some());
}

#[tokio::test]
async fn unknown_person_is_not_found() {
    let svc = TestServices::new();

    let err = svc
        .state
        .authorization
        .list_roles("no-such-person")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
}
