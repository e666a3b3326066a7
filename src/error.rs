// Error handling for the HTTP edge
// Module errors (promotions, auth) render themselves; this covers what the router
// answers on its own: unknown routes and health checks.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// No route matches the request
    #[error("No route for {0}")]
    NotFound(String),

    /// The backing store did not answer
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] PersistenceError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (error_message, details) = match &self {
            ApiError::NotFound(path) => {
                debug!("Unknown route: {}", path);
                ("Not found", self.to_string())
            }
            ApiError::Unavailable(e) => {
                error!("Health check failed: {}", e);
                ("Service unavailable", "The store is not reachable".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "details": details,
        }));

        (self.status_code(), body).into_response()
    }
}
