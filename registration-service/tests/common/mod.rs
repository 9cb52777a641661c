//! Test helpers for registration-service integration tests.
//!
//! Services are wired over the in-memory person store and the mock identity
//! provider, so nothing here needs a database or a running Keycloak.

#![allow(dead_code)]

use registration_service::{
    build_router,
    models::Person,
    services::{AuthorizationService, InMemoryPersonStore, MockIdentityProvider},
    AppState,
};
use secrecy::Secret;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const PASSWORD: &str = "S3cret!pass";

/// Services over shared in-memory collaborators.
pub struct TestServices {
    pub store: Arc<InMemoryPersonStore>,
    pub provider: Arc<MockIdentityProvider>,
    pub state: AppState,
}

impl TestServices {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryPersonStore::new());
        let provider = Arc::new(MockIdentityProvider::new());
        let state = AppState::new(
            "registration-service-test",
            "0.0.0-test",
            store.clone(),
            provider.clone(),
            Duration::from_secs(5),
        );
        Self {
            store,
            provider,
            state,
        }
    }

    /// A second authorization service over the same collaborators, with an
    /// empty account cache.
    pub fn fresh_authorization(&self) -> AuthorizationService {
        AuthorizationService::new(self.provider.clone(), self.store.clone())
    }
}

/// A running HTTP server over [`TestServices`].
pub struct TestApp {
    pub address: String,
    pub services: TestServices,
    client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let services = TestServices::new();
        let app = build_router(services.state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let address = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            address,
            services,
            client: reqwest::Client::new(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

pub fn person(email: &str, role: &str) -> Person {
    Person::new(
        "1020304050",
        "Ana",
        "Gomez",
        email,
        Secret::new(PASSWORD.to_string()),
        role,
    )
}

pub fn register_body(email: &str, role: &str) -> serde_json::Value {
    serde_json::json!({
        "identity_number": "1020304050",
        "first_name": "Ana",
        "last_name": "Gomez",
        "email": email,
        "password": PASSWORD,
        "role": role,
    })
}
