use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::person::{PersonResponse, RegisterPersonRequest, RegistrationResponse};
use crate::services::ServiceError;
use crate::utils::ValidatedJson;
use crate::AppState;

/// Register a person through the registration saga.
pub async fn register_person(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterPersonRequest>,
) -> Result<(StatusCode, Json<RegistrationResponse>), AppError> {
    let result = state.registration.register(req.into_person()).await?;
    Ok((StatusCode::CREATED, Json(result.into())))
}

pub async fn get_person_by_email(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<PersonResponse>, AppError> {
    let person = state
        .store
        .get_by_email(&email)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(person.into()))
}
