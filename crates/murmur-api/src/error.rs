use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use murmur_types::api::ErrorBody;
use murmur_types::error::ChatError;

/// REST failures, rendered as `{"error": code, "message": text, "retryable": bool}`.
#[derive(Debug)]
pub enum ApiError {
    Chat(ChatError),
    /// A request body that does not deserialize
    Malformed(String),
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self::Chat(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Malformed(rejection.body_text())
    }
}

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::InvalidParticipant | ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
        ChatError::NotParticipant | ChatError::Forbidden => StatusCode::FORBIDDEN,
        ChatError::NotFound => StatusCode::NOT_FOUND,
        ChatError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Chat(err) => {
                // Storage details were already logged by the chat service
                let message = match &err {
                    ChatError::StorageFailure(_) => "internal server error".to_string(),
                    other => other.to_string(),
                };
                (
                    status_for(&err),
                    ErrorBody {
                        error: err.code().to_string(),
                        message,
                        retryable: err.is_retryable(),
                    },
                )
            }
            Self::Malformed(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "malformed_request".to_string(),
                    message,
                    retryable: false,
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}
