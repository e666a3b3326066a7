// Session-holding auth provider
//
// Client-style implementation of `AuthProvider`: remembers the current session,
// drops it once expired and broadcasts every change.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::auth::{
    error::AuthResult,
    models::{AuthEvent, LoginRequest, RegisterRequest, Session},
    service::AuthService,
    AuthProvider,
};

const EVENT_CAPACITY: usize = 16;

pub struct SessionAuthProvider {
    service: Arc<AuthService>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionAuthProvider {
    /// Create a provider with no signed-in user
    pub fn new(service: Arc<AuthService>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            service,
            session: RwLock::new(None),
            events,
        }
    }

    fn notify(&self, event: AuthEvent) {
        debug!("Auth event: {:?}", event);
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AuthProvider for SessionAuthProvider {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        {
            let session = self.session.read().await;
            match session.as_ref() {
                None => return Ok(None),
                Some(current) if !current.is_expired(Utc::now()) => {
                    return Ok(Some(current.clone()))
                }
                Some(_) => {}
            }
        }

        let mut session = self.session.write().await;
        if matches!(session.as_ref(), Some(current) if current.is_expired(Utc::now())) {
            *session = None;
            self.notify(AuthEvent::SessionExpired);
        }
        Ok(session.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Session> {
        let session = self
            .service
            .login(LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;

        *self.session.write().await = Some(session.clone());
        self.notify(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<Session> {
        let session = self
            .service
            .register(RegisterRequest {
                email: email.to_string(),
                password: password.to_string(),
                tenant_id: None,
            })
            .await?;

        *self.session.write().await = Some(session.clone());
        self.notify(AuthEvent::SignedUp(session.user.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let previous = self.session.write().await.take();
        if previous.is_some() {
            self.notify(AuthEvent::SignedOut);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::TokenService;
    use crate::auth::AuthError;
    use crate::persistence::InMemoryStore;

    fn provider_with_ttl(ttl: i64) -> SessionAuthProvider {
        let service = AuthService::new(
            Arc::new(InMemoryStore::new()),
            TokenService::with_ttl("test_secret".to_string(), ttl),
        );
        SessionAuthProvider::new(Arc::new(service))
    }

    #[tokio::test]
    async fn test_sign_up_sign_out_cycle() {
        let provider = provider_with_ttl(3600);
        let mut events = provider.subscribe();

        assert!(provider.get_session().await.unwrap().is_none());

        let session = provider.sign_up("new@example.com", "password123").await.unwrap();
        assert_eq!(
            provider.get_session().await.unwrap().map(|s| s.user.id),
            Some(session.user.id)
        );
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedUp(session.user.clone()));

        provider.sign_out().await.unwrap();
        assert!(provider.get_session().await.unwrap().is_none());
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);

        let again = provider.sign_in("new@example.com", "password123").await.unwrap();
        assert_eq!(again.user.id, session.user.id);
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn(again.user.clone()));
    }

    #[tokio::test]
    async fn test_expired_session_is_dropped() {
        let provider = provider_with_ttl(0);
        let mut events = provider.subscribe();

        provider.sign_up("brief@example.com", "password123").await.unwrap();
        let _ = events.recv().await.unwrap();

        assert!(provider.get_session().await.unwrap().is_none());
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SessionExpired);
    }

    #[tokio::test]
    async fn test_failed_sign_in_keeps_no_session() {
        let provider = provider_with_ttl(3600);
        let err = provider.sign_in("ghost@example.com", "password123").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(provider.get_session().await.unwrap().is_none());
    }
}
