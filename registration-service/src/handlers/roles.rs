use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::person::{
    PermissionQuery, PermissionResponse, RoleCheckResponse, RoleRequest, RolesResponse,
};
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn list_roles(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
) -> Result<Json<RolesResponse>, AppError> {
    let roles = state.authorization.list_roles(&person_id).await?;
    Ok(Json(RolesResponse { person_id, roles }))
}

pub async fn assign_role(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
    ValidatedJson(req): ValidatedJson<RoleRequest>,
) -> Result<StatusCode, AppError> {
    state
        .authorization
        .assign_role(&person_id, &req.role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_role(
    State(state): State<AppState>,
    Path((person_id, role)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.authorization.remove_role(&person_id, &role).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn check_role(
    State(state): State<AppState>,
    Path((person_id, role)): Path<(String, String)>,
) -> Result<Json<RoleCheckResponse>, AppError> {
    let has_role = state.authorization.has_role(&person_id, &role).await?;
    Ok(Json(RoleCheckResponse {
        person_id,
        role,
        has_role,
    }))
}

pub async fn check_permission(
    State(state): State<AppState>,
    Path(person_id): Path<String>,
    Query(query): Query<PermissionQuery>,
) -> Result<Json<PermissionResponse>, AppError> {
    let allowed = state
        .authorization
        .has_permission(&person_id, &query.resource, &query.action)
        .await?;
    Ok(Json(PermissionResponse {
        person_id,
        resource: query.resource,
        action: query.action,
        allowed,
    }))
}
