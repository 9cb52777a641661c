//! HTTP API tests over the in-memory wiring.

mod common;

use common::{register_body, TestApp, PASSWORD};
use registration_service::services::ProviderOperation;
use serde_json::{json, Value};

async fn register(app: &TestApp, email: &str, role: &str) -> reqwest::Response {
    app.client()
        .post(app.url("/persons"))
        .json(&register_body(email, role))
        .send()
        .await
        .expect("Failed to execute request")
}

async fn registered_id(app: &TestApp, email: &str) -> String {
    let response = register(app, email, "user").await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    body["person"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_check_returns_200() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app.client().get(app.url("/health")).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "registration-service-test");
    assert_eq!(body["checks"]["person_store"], "up");
}

#[tokio::test]
async fn register_returns_201_with_the_linked_person() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = register(&app, "a@x.com", "user").await;

    // Assert
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Person registered successfully");
    assert_eq!(body["person"]["email"], "a@x.com");
    assert!(body["person"]["external_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body["person"].get("password").is_none());
    assert!(body["person"].get("password_hash").is_none());
}

#[tokio::test]
async fn duplicate_registration_returns_409() {
    let app = TestApp::spawn().await;
    register(&app, "a@x.com", "user").await;

    let response = register(&app, "a@x.com", "user").await;

    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "ALREADY_REGISTERED");
}

#[tokio::test]
async fn missing_role_returns_400() {
    let app = TestApp::spawn().await;

    let response = register(&app, "a@x.com", "").await;

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "ROLE_REQUIRED");
}

#[tokio::test]
async fn invalid_email_returns_422() {
    let app = TestApp::spawn().await;

    let response = register(&app, "not-an-email", "user").await;

    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn failed_saga_returns_500_naming_the_step() {
    // Arrange
    let app = TestApp::spawn().await;
    app.services.provider.fail(ProviderOperation::SetCredential);

    // Act
    let response = register(&app, "a@x.com", "user").await;

    // Assert
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "REGISTRATION_FAILED");
    assert_eq!(body["details"], "step: provision_credential");
    assert_eq!(app.services.store.count_by_email("a@x.com"), 0);
}

#[tokio::test]
async fn get_person_by_email() {
    // Arrange
    let app = TestApp::spawn().await;
    let id = registered_id(&app, "a@x.com").await;

    // Act
    let found = app
        .client()
        .get(app.url("/persons/by-email/a@x.com"))
        .send()
        .await
        .unwrap();
    let missing = app
        .client()
        .get(app.url("/persons/by-email/b@x.com"))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(found.status(), 200);
    let body: Value = found.json().await.unwrap();
    assert_eq!(body["id"], id.as_str());
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn login_refresh_and_logout() {
    // Arrange
    let app = TestApp::spawn().await;
    registered_id(&app, "a@x.com").await;

    // Act
    let login = app
        .client()
        .post(app.url("/auth/login"))
        .json(&json!({ "email": "a@x.com", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 200);
    let tokens: Value = login.json().await.unwrap();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    let refreshed = app
        .client()
        .post(app.url("/auth/refresh"))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(refreshed.status(), 200);
    let tokens: Value = refreshed.json().await.unwrap();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    let logout = app
        .client()
        .post(app.url("/auth/logout"))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(logout.status(), 200);
    let reused = app
        .client()
        .post(app.url("/auth/refresh"))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await
        .unwrap();
    assert_eq!(reused.status(), 401);
}

#[tokio::test]
async fn bad_credentials_return_401() {
    let app = TestApp::spawn().await;
    registered_id(&app, "a@x.com").await;

    for body in [
        json!({ "email": "a@x.com", "password": "wrong-password" }),
        json!({ "email": "nobody@x.com", "password": PASSWORD }),
    ] {
        let response = app
            .client()
            .post(app.url("/auth/login"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_CREDENTIALS");
    }
}

#[tokio::test]
async fn role_management_and_permission_checks() {
    // Arrange
    let app = TestApp::spawn().await;
    let id = registered_id(&app, "a@x.com").await;
    let permission_url = app.url(&format!(
        "/persons/{}/permissions?resource=users&action=update",
        id
    ));

    // Act / Assert
    let roles: Value = app
        .client()
        .get(app.url(&format!("/persons/{}/roles", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(roles["roles"], json!(["user"]));

    let check: Value = app
        .client()
        .get(&permission_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(check["allowed"], false);

    let assigned = app
        .client()
        .post(app.url(&format!("/persons/{}/roles", id)))
        .json(&json!({ "role": "moderator" }))
        .send()
        .await
        .unwrap();
    assert_eq!(assigned.status(), 204);

    let check: Value = app
        .client()
        .get(&permission_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(check["allowed"], true);

    let removed = app
        .client()
        .delete(app.url(&format!("/persons/{}/roles/moderator", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);

    let check: Value = app
        .client()
        .get(&permission_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(check["allowed"], false);
}

#[tokio::test]
async fn role_check_reports_membership() {
    // Arrange
    let app = TestApp::spawn().await;
    let id = registered_id(&app, "a@x.com").await;

    // Act
    let held: Value = app
        .client()
        .get(app.url(&format!("/persons/{}/roles/user", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let missing: Value = app
        .client()
        .get(app.url(&format!("/persons/{}/roles/admin", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Assert
    assert_eq!(held["person_id"], id.as_str());
    assert_eq!(held["role"], "user");
    assert_eq!(held["has_role"], true);
    assert_eq!(missing["has_role"], false);
}

#[tokio::test]
async fn roles_of_unknown_person_return_404() {
    let app = TestApp::spawn().await;

    let response = app
        .client()
        .get(app.url("/persons/no-such-person/roles"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}
