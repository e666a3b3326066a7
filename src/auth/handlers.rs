// HTTP handlers for authentication endpoints

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::auth::{
    error::AuthError,
    middleware::AuthenticatedUser,
    models::{AuthUser, LoginRequest, RegisterRequest, Session},
    service::AuthService,
};

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/auth/sign-up",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = Session),
        (status = 400, description = "Invalid email or password"),
        (status = 403, description = "Tenant already has members"),
        (status = 409, description = "Email already exists")
    ),
    tag = "auth"
)]
pub async fn sign_up_handler(
    State(service): State<Arc<AuthService>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Session>), AuthError> {
    let session = service.register(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/api/auth/sign-in",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = Session),
        (status = 401, description = "Invalid email or password")
    ),
    tag = "auth"
)]
pub async fn sign_in_handler(
    State(service): State<Arc<AuthService>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Session>, AuthError> {
    Ok(Json(service.login(request).await?))
}

/// Current user behind the bearer token
#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Current user", body = AuthUser),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn session_handler(
    State(service): State<Arc<AuthService>>,
    user: AuthenticatedUser,
) -> Result<Json<AuthUser>, AuthError> {
    Ok(Json(service.get_user(user.user_id).await?))
}
