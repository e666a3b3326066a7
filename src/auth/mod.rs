// Authentication module
// JWT sessions over the persistence service, plus the provider contract the
// promotion engine depends on.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod password;
pub mod provider;
pub mod service;
pub mod token;

use async_trait::async_trait;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use error::{AuthError, AuthResult};
pub use handlers::{session_handler, sign_in_handler, sign_up_handler};
pub use middleware::AuthenticatedUser;
pub use models::{AuthEvent, AuthUser, LoginRequest, RegisterRequest, Session, User};
pub use provider::SessionAuthProvider;
pub use service::AuthService;
pub use token::TokenService;

/// Session source injected into the promotion engine
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The current session, or `None` when signed out or expired
    async fn get_session(&self) -> AuthResult<Option<Session>>;

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session>;

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<Session>;

    async fn sign_out(&self) -> AuthResult<()>;

    /// Stream of session changes
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
