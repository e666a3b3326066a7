// Authentication extractor for protected routes

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use tracing::debug;
use uuid::Uuid;

use crate::auth::{error::AuthError, token::TokenService};

/// Authenticated user extractor for protected routes
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub tenant_id: Option<Uuid>,
}

impl AuthenticatedUser {
    /// Only members of `tenant_id` may read or change its data
    pub fn authorize_tenant(&self, tenant_id: Uuid) -> Result<(), AuthError> {
        if self.tenant_id == Some(tenant_id) {
            Ok(())
        } else {
            debug!("User {} denied access to tenant {}", self.user_id, tenant_id);
            Err(AuthError::TenantAccessDenied)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Extract Authorization header
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?
            .to_str()
            .map_err(|_| AuthError::InvalidToken)?;

        // Verify Bearer token format
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidToken)?;

        let token_service = TokenService::from_ref(state);
        let claims = token_service.validate_access_token(token)?;
        debug!("Authenticated user {}", claims.sub);

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
            tenant_id: claims.tenant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(header_value: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/promotions/apply");
        if let Some(value) = header_value {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_valid_bearer_token() {
        let tokens = TokenService::new("secret".to_string());
        let user_id = Uuid::new_v4();
        let (token, _) = tokens
            .generate_access_token(user_id, "a@example.com", None)
            .unwrap();

        let mut parts = parts_with(Some(&format!("Bearer {}", token)));
        let user = AuthenticatedUser::from_request_parts(&mut parts, &tokens)
            .await
            .unwrap();
        assert_eq!(user.user_id, user_id);
    }

    #[test]
    fn test_authorize_tenant() {
        let tenant_id = Uuid::new_v4();
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            tenant_id: Some(tenant_id),
        };
        assert!(user.authorize_tenant(tenant_id).is_ok());
        assert!(matches!(
            user.authorize_tenant(Uuid::new_v4()),
            Err(AuthError::TenantAccessDenied)
        ));

        let unscoped = AuthenticatedUser {
            tenant_id: None,
            ..user
        };
        assert!(unscoped.authorize_tenant(tenant_id).is_err());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_headers() {
        let tokens = TokenService::new("secret".to_string());

        let mut parts = parts_with(None);
        let err = AuthenticatedUser::from_request_parts(&mut parts, &tokens)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));

        let mut parts = parts_with(Some("Token abc"));
        let err = AuthenticatedUser::from_request_parts(&mut parts, &tokens)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
