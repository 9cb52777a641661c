use axum::extract::{rejection::JsonRejection, FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use service_core::error::AppError;
use validator::Validate;

/// JSON body extractor that also runs `validator` rules.
///
/// Rejections render like any other [`AppError`]: malformed bodies keep the
/// status axum chose, failed rules become `422 VALIDATION_ERROR`.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(malformed)?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

fn malformed(rejection: JsonRejection) -> AppError {
    AppError::Classified {
        status: rejection.status(),
        code: "INVALID_JSON",
        message: "Malformed request body".to_string(),
        details: Some(rejection.body_text()),
    }
}
