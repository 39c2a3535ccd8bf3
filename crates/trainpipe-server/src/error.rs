//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use trainpipe_core::TrainpipeError;

/// API error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub field: Option<String>,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            field: None,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            field: None,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            field: None,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "type": match self.status {
                    StatusCode::BAD_REQUEST => "invalid_request_error",
                    StatusCode::NOT_FOUND => "not_found_error",
                    _ => "server_error",
                },
                "param": self.field,
                "code": self.status.as_str()
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<TrainpipeError> for ApiError {
    fn from(err: TrainpipeError) -> Self {
        match &err {
            TrainpipeError::Validation { field, message } => Self {
                status: StatusCode::BAD_REQUEST,
                field: Some(field.clone()),
                message: message.clone(),
            },
            TrainpipeError::NotFound { .. } | TrainpipeError::BaseModelNotFound { .. } => {
                ApiError::not_found(err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}
