// Error types for the promotion engine
// Evaluation-path failures are recovered locally; these are the errors that reach
// callers of the commit path and catalog administration.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::persistence::PersistenceError;

/// Main error type for the promotion engine
#[derive(Debug, Error)]
pub enum PromotionError {
    /// Malformed rule, value or request payload
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A usage cap was reached at commit time
    #[error("Usage limit reached for promotion {0}")]
    LimitExceeded(Uuid),

    /// Backing store failure, propagated unchanged
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The atomic reserve step lost a race; treat as LimitExceeded and re-evaluate
    #[error("Concurrent update conflict on promotion {0}")]
    ConcurrencyConflict(Uuid),

    #[error("Promotion not found: {0}")]
    PromotionNotFound(Uuid),

    /// A promotion definition violates its invariants
    #[error("Invalid promotion: {0}")]
    InvalidPromotion(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Result type alias for promotion engine operations
pub type PromoResult<T> = Result<T, PromotionError>;

impl From<validator::ValidationErrors> for PromotionError {
    fn from(err: validator::ValidationErrors) -> Self {
        PromotionError::Validation(err.to_string())
    }
}

impl PromotionError {
    /// Errors a caller sees as a declined application rather than a failure
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            PromotionError::LimitExceeded(_) | PromotionError::ConcurrencyConflict(_)
        )
    }
}

impl IntoResponse for PromotionError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            PromotionError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation error"),
            PromotionError::LimitExceeded(_) | PromotionError::ConcurrencyConflict(_) => {
                (StatusCode::CONFLICT, "Usage limit exceeded")
            }
            PromotionError::Persistence(e) => {
                tracing::error!("Persistence error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Persistence error")
            }
            PromotionError::PromotionNotFound(_) => (StatusCode::NOT_FOUND, "Promotion not found"),
            PromotionError::InvalidPromotion(_) => (StatusCode::BAD_REQUEST, "Invalid promotion"),
            PromotionError::Auth(AuthError::TenantAccessDenied) => {
                (StatusCode::FORBIDDEN, "Forbidden")
            }
            PromotionError::Auth(auth) => (auth.status_code(), "Authentication error"),
        };

        // Store failures carry internals that stay in the logs
        let details = match &self {
            PromotionError::Persistence(_) => "A persistence error occurred".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "details": details,
        }));

        (status, body).into_response()
    }
}
