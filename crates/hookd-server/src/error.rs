use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hookd_core::HookdError;

/// Unified error type for HTTP responses.
///
/// The trigger route builds its structured outcome bodies directly; this
/// type covers the remaining routes and any error that escapes a handler.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<HookdError>() {
            match e {
                HookdError::Unauthorized => StatusCode::UNAUTHORIZED,
                HookdError::UnknownProcedure(_) => StatusCode::NOT_FOUND,
                HookdError::AlreadyRunning(_) => StatusCode::CONFLICT,
                HookdError::DuplicateProcedure(_)
                | HookdError::NoSteps(_)
                | HookdError::EmptyCommand { .. }
                | HookdError::EmptyCredential
                | HookdError::InvalidListenAddr(_)
                | HookdError::Io(_)
                | HookdError::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
