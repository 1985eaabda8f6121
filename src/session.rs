//! Session manager
//!
//! Turns a [`Configuration`] into an authenticated [`Session`] using one of
//! the two auth strategies, and notifies subscribers of the result.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{error, info};

use crate::config::{AuthStrategy, Configuration};
use crate::constants::headers;
use crate::error::AuthError;
use crate::rest::{HttpRequest, Method, RestExecutor, Transport};

/// Authenticated identity used by every data call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub authenticated: bool,
    pub owner_id: String,
    pub bearer_token: String,
}

/// Published after every authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Authenticated { owner_id: String },
    Failed { reason: AuthError },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

/// Perform exactly one authentication attempt.
///
/// StaticKey never touches the network. Credentials issues a single
/// password-grant POST unless the configuration already carries a token.
pub fn authenticate(config: &Configuration, transport: &dyn Transport) -> Result<Session, AuthError> {
    config
        .validate()
        .map_err(|e| AuthError::InvalidConfiguration(e.to_string()))?;

    match config.auth_strategy {
        AuthStrategy::StaticKey => Ok(Session {
            authenticated: true,
            owner_id: config.owner_id.clone(),
            bearer_token: config.static_api_key.clone(),
        }),
        AuthStrategy::Credentials if !config.needs_authentication() => {
            if config.owner_id.is_empty() {
                return Err(AuthError::InvalidConfiguration(
                    "user_id required with a pre-issued token".to_string(),
                ));
            }
            Ok(Session {
                authenticated: true,
                owner_id: config.owner_id.clone(),
                bearer_token: config.session_token.clone().unwrap_or_default(),
            })
        }
        AuthStrategy::Credentials => password_grant(config, transport),
    }
}

fn password_grant(config: &Configuration, transport: &dyn Transport) -> Result<Session, AuthError> {
    let body = json!({ "email": config.email, "password": config.password });
    let request = HttpRequest::new(Method::Post, config.auth_url())
        .header(headers::API_KEY, config.static_api_key.as_str())
        .header(headers::CONTENT_TYPE, headers::JSON)
        .body(body.to_string());

    let outcome = transport.send(&request);
    if outcome.is_transport_failure() {
        return Err(AuthError::Transport(outcome.body));
    }
    if outcome.status != 200 {
        return Err(AuthError::Rejected {
            status: outcome.status,
            body: outcome.body,
        });
    }

    let response: TokenResponse = serde_json::from_str(&outcome.body)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    if response.access_token.is_empty() || response.user.id.is_empty() {
        return Err(AuthError::MalformedResponse(
            "empty access_token or user id".to_string(),
        ));
    }

    Ok(Session {
        authenticated: true,
        owner_id: response.user.id,
        bearer_token: response.access_token,
    })
}

/// Owns the configuration and the current session
pub struct SessionManager {
    config: Configuration,
    transport: Arc<dyn Transport>,
    session: Session,
    subscribers: Vec<Sender<SessionEvent>>,
    /// `config.session_token` came from our own password grant
    token_from_login: bool,
}

impl SessionManager {
    pub fn new(config: Configuration, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            session: Session::default(),
            subscribers: Vec::new(),
            token_from_login: false,
        }
    }

    /// Receive one event per authentication attempt
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// One authentication attempt with the current configuration. A token
    /// issued by an earlier login is dropped first, so every call with
    /// email and password logs in again. A pre-issued token is kept.
    pub fn setup(&mut self) -> Result<&Session, AuthError> {
        if self.token_from_login && self.has_password_login() {
            self.config.session_token = None;
        }
        match authenticate(&self.config, self.transport.as_ref()) {
            Ok(session) => {
                info!(
                    strategy = ?self.config.auth_strategy,
                    owner_id = %session.owner_id,
                    "Authenticated"
                );
                if self.config.auth_strategy == AuthStrategy::Credentials {
                    self.token_from_login = self.config.needs_authentication();
                    self.config.session_token = Some(session.bearer_token.clone());
                    self.config.owner_id = session.owner_id.clone();
                }
                self.publish(SessionEvent::Authenticated {
                    owner_id: session.owner_id.clone(),
                });
                self.session = session;
                Ok(&self.session)
            }
            Err(e) => {
                error!(strategy = ?self.config.auth_strategy, error = %e, "Authentication failed");
                self.session = Session::default();
                self.publish(SessionEvent::Failed { reason: e.clone() });
                Err(e)
            }
        }
    }

    /// Drop the current session and try again once. With email and
    /// password any stored token is discarded so the login runs afresh.
    pub fn reconnect(&mut self) -> Result<&Session, AuthError> {
        if self.has_password_login() {
            self.config.session_token = None;
        }
        self.session = Session::default();
        self.setup()
    }

    fn has_password_login(&self) -> bool {
        self.config.auth_strategy == AuthStrategy::Credentials
            && !self.config.email.is_empty()
            && !self.config.password.is_empty()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.authenticated
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.config
    }

    /// Executor bound to the current session, if authenticated
    pub fn executor(&self) -> Option<RestExecutor> {
        self.session
            .authenticated
            .then(|| RestExecutor::new(self.transport.clone(), &self.config, &self.session))
    }

    fn publish(&mut self, event: SessionEvent) {
        // Receivers that hung up are dropped
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::InMemoryBackend;

    fn static_config() -> Configuration {
        Configuration {
            service_base_url: "http://backend.local".to_string(),
            static_api_key: "anon".to_string(),
            owner_id: "owner-1".to_string(),
            ..Configuration::default()
        }
    }

    fn credentials_config(password: &str) -> Configuration {
        Configuration {
            auth_strategy: AuthStrategy::Credentials,
            owner_id: String::new(),
            email: "me@example.com".to_string(),
            password: password.to_string(),
            ..static_config()
        }
    }

    fn backend() -> Arc<InMemoryBackend> {
        let backend = InMemoryBackend::new("anon");
        backend.register_user("me@example.com", "pw", "user-42");
        Arc::new(backend)
    }

    #[test]
    fn test_static_key_makes_no_network_call() {
        let backend = backend();
        let session = authenticate(&static_config(), backend.as_ref()).unwrap();
        assert!(session.authenticated);
        assert_eq!(session.owner_id, "owner-1");
        assert_eq!(session.bearer_token, "anon");
        assert_eq!(backend.request_count(), 0);
    }

    #[test]
    fn test_credentials_success_sets_owner_and_token() {
        let backend = backend();
        let mut manager = SessionManager::new(credentials_config("pw"), backend.clone());
        let events = manager.subscribe();

        let session = manager.setup().unwrap().clone();
        assert_eq!(session.owner_id, "user-42");
        assert!(session.bearer_token.starts_with("token-user-42"));
        assert_eq!(backend.request_count(), 1);
        assert_eq!(
            manager.configuration().session_token.as_deref(),
            Some(session.bearer_token.as_str())
        );
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Authenticated {
                owner_id: "user-42".to_string()
            }
        );
    }

    #[test]
    fn test_credentials_rejected_reports_failure() {
        let backend = backend();
        let mut manager = SessionManager::new(credentials_config("wrong"), backend.clone());
        let events = manager.subscribe();

        let err = manager.setup().unwrap_err();
        assert!(matches!(err, AuthError::Rejected { status: 400, .. }));
        assert!(!manager.is_authenticated());
        assert!(manager.executor().is_none());
        assert_eq!(backend.request_count(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Failed { .. }
        ));
    }

    #[test]
    fn test_unreachable_auth_endpoint() {
        let backend = backend();
        backend.set_offline(true);
        let err = authenticate(&credentials_config("pw"), backend.as_ref()).unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
    }

    #[test]
    fn test_invalid_configuration_skips_network() {
        let backend = backend();
        let config = Configuration {
            static_api_key: String::new(),
            ..static_config()
        };
        let err = authenticate(&config, backend.as_ref()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfiguration(_)));
        assert_eq!(backend.request_count(), 0);
    }

    #[test]
    fn test_pre_issued_token_used_without_login() {
        let backend = backend();
        let config = Configuration {
            auth_strategy: AuthStrategy::Credentials,
            session_token: Some("jwt".to_string()),
            ..static_config()
        };
        let session = authenticate(&config, backend.as_ref()).unwrap();
        assert_eq!(session.bearer_token, "jwt");
        assert_eq!(backend.request_count(), 0);
    }

    #[test]
    fn test_reconnect_makes_exactly_one_more_attempt() {
        let backend = backend();
        let mut manager = SessionManager::new(credentials_config("pw"), backend.clone());
        manager.setup().unwrap();
        manager.reconnect().unwrap();
        assert_eq!(backend.request_count(), 2);
        assert!(manager.is_authenticated());
    }

    #[test]
    fn test_repeated_setup_logs_in_each_time() {
        let backend = backend();
        let mut manager = SessionManager::new(credentials_config("pw"), backend.clone());
        manager.setup().unwrap();
        manager.setup().unwrap();
        assert_eq!(backend.request_count(), 2);
        assert_eq!(manager.session().owner_id, "user-42");
    }

    #[test]
    fn test_setup_keeps_pre_issued_token() {
        let backend = backend();
        let config = Configuration {
            session_token: Some("jwt".to_string()),
            owner_id: "owner-1".to_string(),
            ..credentials_config("pw")
        };
        let mut manager = SessionManager::new(config, backend.clone());
        manager.setup().unwrap();
        manager.setup().unwrap();
        assert_eq!(manager.session().bearer_token, "jwt");
        assert_eq!(backend.request_count(), 0);
    }

    #[test]
    fn test_malformed_token_response() {
        struct Garbage;
        impl Transport for Garbage {
            fn send(&self, _request: &HttpRequest) -> crate::rest::HttpOutcome {
                crate::rest::HttpOutcome::new(200, "not json".to_string())
            }
        }
        let err = authenticate(&credentials_config("pw"), &Garbage).unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }
}
