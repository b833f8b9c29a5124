use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lingodrill_core::CoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Core(e) => match e {
                CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                CoreError::Invalid(_) => (StatusCode::BAD_REQUEST, "invalid"),
                CoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
                CoreError::InvalidTransition { .. } | CoreError::InvalidStatus { .. } => {
                    (StatusCode::CONFLICT, "invalid_transition")
                }
                CoreError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(ErrorResponse {
            error,
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lingodrill_core::DrillState;

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError::from(CoreError::NotFound("card")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn rejected_transition_maps_to_409() {
        let err = CoreError::InvalidTransition {
            from: DrillState::Dismissed,
            action: "snooze",
        };
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_input_maps_to_400() {
        let response = ApiError::from(CoreError::Invalid("quality")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = ApiError::BadRequest("missing until".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_maps_to_500() {
        let response = ApiError::from(CoreError::Storage("sqlite read card")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn message_keeps_core_wording() {
        let err = ApiError::from(CoreError::NotFound("card"));
        assert_eq!(err.to_string(), "not found: card");
    }
}
