pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::services::{
    AuthorizationService, IdentityProvider, PersonStore, RegistrationOrchestrator,
    ServiceError, SessionService,
};

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub service_version: String,
    pub store: Arc<dyn PersonStore>,
    pub authorization: AuthorizationService,
    pub registration: Arc<RegistrationOrchestrator>,
    pub sessions: SessionService,
}

impl AppState {
    /// Wire the services over a store and an identity provider.
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        store: Arc<dyn PersonStore>,
        provider: Arc<dyn IdentityProvider>,
        step_timeout: Duration,
    ) -> Self {
        let authorization = AuthorizationService::new(provider.clone(), store.clone());
        let registration =
            RegistrationOrchestrator::new(store.clone(), authorization.clone(), step_timeout);
        let sessions = SessionService::new(store.clone(), provider);

        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            store,
            authorization,
            registration: Arc::new(registration),
            sessions,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/persons", post(handlers::person::register_person))
        .route(
            "/persons/by-email/:email",
            get(handlers::person::get_person_by_email),
        )
        .route(
            "/persons/:id/roles",
            get(handlers::roles::list_roles).post(handlers::roles::assign_role),
        )
        .route(
            "/persons/:id/roles/:role",
            get(handlers::roles::check_role).delete(handlers::roles::remove_role),
        )
        .route(
            "/persons/:id/permissions",
            get(handlers::roles::check_permission),
        )
        .route("/auth/login", post(handlers::session::login))
        .route("/auth/refresh", post(handlers::session::refresh))
        .route("/auth/logout", post(handlers::session::logout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Person store health check failed");
        ServiceError::from(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.service_version,
        "checks": {
            "person_store": "up"
        }
    })))
}
