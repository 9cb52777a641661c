use axum::{extract::State, Json};
use secrecy::Secret;
use service_core::error::AppError;

use crate::dtos::session::{
    LoginRequest, LogoutRequest, MessageResponse, RefreshRequest, TokenResponse,
};
use crate::utils::ValidatedJson;
use crate::AppState;

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state
        .sessions
        .login(&req.email, &Secret::new(req.password))
        .await?;
    Ok(Json(token.into()))
}

pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.sessions.refresh(&req.refresh_token).await?;
    Ok(Json(token.into()))
}

pub async fn logout(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.sessions.logout(&req.refresh_token).await?;
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}
