// Authentication service - business logic layer
//
// Users live in the `users` table behind the persistence service. Emails are
// stored lowercased so uniqueness is case-insensitive.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    error::{AuthError, AuthResult},
    models::{AuthUser, LoginRequest, RegisterRequest, Session, User},
    password::PasswordService,
    token::TokenService,
};
use crate::persistence::{decode, Filter, PersistenceService, Table};

/// Authentication service coordinating all auth operations
pub struct AuthService {
    store: Arc<dyn PersistenceService>,
    token_service: TokenService,
}

impl AuthService {
    /// Create a new AuthService
    pub fn new(store: Arc<dyn PersistenceService>, token_service: TokenService) -> Self {
        Self {
            store,
            token_service,
        }
    }

    pub fn token_service(&self) -> &TokenService {
        &self.token_service
    }

    /// Register a new user and open a session for them
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<Session> {
        request.validate()?;
        PasswordService::validate_password_strength(&request.password)?;

        let email = normalize_email(&request.email);
        if self.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        // A tenant can only be claimed by its first user; without one a fresh tenant is opened
        let tenant_id = match request.tenant_id {
            Some(tenant_id) => {
                if self.tenant_has_users(tenant_id).await? {
                    warn!("Sign-up tried to join existing tenant {}", tenant_id);
                    return Err(AuthError::TenantAccessDenied);
                }
                tenant_id
            }
            None => Uuid::new_v4(),
        };

        let user = User {
            id: Uuid::new_v4(),
            email,
            password_hash: PasswordService::hash_password(&request.password)?,
            tenant_id: Some(tenant_id),
            created_at: Utc::now(),
        };
        let row = serde_json::to_value(&user).map_err(|e| AuthError::DatabaseError(e.to_string()))?;
        self.store.insert(Table::Users, row).await?;

        info!("Registered user {}", user.id);
        self.issue_session(&user)
    }

    /// Verify credentials and open a session
    pub async fn login(&self, request: LoginRequest) -> AuthResult<Session> {
        request.validate()?;

        let email = normalize_email(&request.email);
        let user = match self.find_by_email(&email).await? {
            Some(user) => user,
            None => {
                warn!("Login attempt for unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !PasswordService::verify_password(&request.password, &user.password_hash)? {
            warn!("Failed login for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        info!("User {} signed in", user.id);
        self.issue_session(&user)
    }

    /// Resolve a bearer token to the user it was issued for
    pub fn validate_token(&self, token: &str) -> AuthResult<AuthUser> {
        let claims = self.token_service.validate_access_token(token)?;
        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
            tenant_id: claims.tenant_id,
        })
    }

    /// Get a user by id
    pub async fn get_user(&self, user_id: Uuid) -> AuthResult<AuthUser> {
        let row = self
            .store
            .get(Table::Users, user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let user: User = decode(row)?;
        Ok(AuthUser::from(&user))
    }

    fn issue_session(&self, user: &User) -> AuthResult<Session> {
        let (access_token, claims) =
            self.token_service
                .generate_access_token(user.id, &user.email, user.tenant_id)?;
        Ok(Session {
            access_token,
            user: AuthUser::from(user),
            expires_at: claims.expires_at(),
        })
    }

    async fn tenant_has_users(&self, tenant_id: Uuid) -> AuthResult<bool> {
        let rows = self
            .store
            .list(Table::Users, &[Filter::eq("tenant_id", tenant_id)], &[])
            .await?;
        Ok(!rows.is_empty())
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let rows = self
            .store
            .list(Table::Users, &[Filter::eq("email", email)], &[])
            .await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(decode(row)?)),
            None => Ok(None),
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
