//! Configuration for the preset client
//!
//! This module provides:
//! - **Configuration**: the resolved service settings owned by the session manager
//! - **credentials**: the `key=value` credential file loader that builds it

pub mod credentials;

use std::fmt;

use crate::constants::{endpoints, http, store};
use crate::error::SyncError;

/// Which of the two authentication strategies a configuration uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthStrategy {
    /// Static API key used as bearer, owner id taken from configuration
    #[default]
    StaticKey,
    /// Email/password login; owner id assigned by the remote service
    Credentials,
}

/// How bulk deletes are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteStrategy {
    /// One filtered DELETE, falling back to per-row deletes if the backend refuses it
    #[default]
    Filtered,
    /// Always select matching ids first, then delete one row at a time
    ById,
}

/// Resolved service configuration
#[derive(Clone, PartialEq, Eq)]
pub struct Configuration {
    pub service_base_url: String,
    pub static_api_key: String,
    pub owner_id: String,
    pub email: String,
    pub password: String,
    pub auth_strategy: AuthStrategy,
    /// Filled after a successful Credentials login
    pub session_token: Option<String>,
    pub table: String,
    pub delete_strategy: DeleteStrategy,
    pub timeout_secs: u64,
    /// Load the newly selected preset on every cursor change
    pub auto_load: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            service_base_url: String::new(),
            static_api_key: String::new(),
            owner_id: String::new(),
            email: String::new(),
            password: String::new(),
            auth_strategy: AuthStrategy::default(),
            session_token: None,
            table: store::DEFAULT_TABLE.to_string(),
            delete_strategy: DeleteStrategy::default(),
            timeout_secs: http::DEFAULT_TIMEOUT_SECS,
            auto_load: false,
        }
    }
}

// Secrets stay out of `config={:#?}` style log lines
impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("service_base_url", &self.service_base_url)
            .field("static_api_key", &redact(&self.static_api_key))
            .field("owner_id", &self.owner_id)
            .field("email", &self.email)
            .field("password", &redact(&self.password))
            .field("auth_strategy", &self.auth_strategy)
            .field(
                "session_token",
                &self.session_token.as_deref().map(redact),
            )
            .field("table", &self.table)
            .field("delete_strategy", &self.delete_strategy)
            .field("timeout_secs", &self.timeout_secs)
            .field("auto_load", &self.auto_load)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<empty>" } else { "<redacted>" }
}

impl Configuration {
    /// Check the field requirements of the selected strategy.
    ///
    /// The static key is required in both modes because every call carries it.
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut missing = Vec::new();

        if self.service_base_url.is_empty() {
            missing.push("project_url");
        }
        if self.static_api_key.is_empty() {
            missing.push("api_key");
        }

        match self.auth_strategy {
            AuthStrategy::StaticKey => {
                if self.owner_id.is_empty() {
                    missing.push("user_id");
                }
            }
            AuthStrategy::Credentials => {
                let has_login = !self.email.is_empty() && !self.password.is_empty();
                let has_token = self.session_token.as_deref().is_some_and(|t| !t.is_empty());
                if !has_login && !has_token {
                    if self.email.is_empty() {
                        missing.push("email");
                    }
                    if self.password.is_empty() {
                        missing.push("password");
                    }
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::ConfigurationInvalid(format!(
                "missing {} for {:?} mode",
                missing.join(", "),
                self.auth_strategy
            )))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Credentials mode without a token yet
    pub fn needs_authentication(&self) -> bool {
        self.auth_strategy == AuthStrategy::Credentials
            && self.session_token.as_deref().is_none_or(str::is_empty)
    }

    /// `<base>/rest/v1/<table>`
    pub fn table_url(&self) -> String {
        format!(
            "{}{}/{}",
            self.service_base_url,
            endpoints::REST_PREFIX,
            self.table
        )
    }

    /// `<base>/auth/v1/token?grant_type=password`
    pub fn auth_url(&self) -> String {
        format!(
            "{}{}?grant_type={}",
            self.service_base_url,
            endpoints::AUTH_TOKEN,
            endpoints::PASSWORD_GRANT
        )
    }
}
