use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Error responses for the webhook server.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message, rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub enum ApiError {
    /// 405 - Wrong HTTP method for the endpoint.
    MethodNotAllowed,
    /// 404 - No such route.
    NotFound,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MethodNotAllowed => "method_not_allowed",
            ApiError::NotFound => "not_found",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::MethodNotAllowed => "Method not allowed.".to_string(),
            ApiError::NotFound => "Not found.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
