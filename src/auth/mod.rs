//! Registry authenticators
//!
//! An [`Authenticator`] supplies a username/password pair for one registry
//! credential scope. [`TokenAuthenticator`] obtains the pair from the ECR token
//! service and caches it until shortly before it expires; [`Anonymous`] is used
//! for registries that ECR does not serve.

pub mod authenticator;
pub mod error;
pub mod fetcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use authenticator::{
    max_ttl_from_env, AuthenticatorOptions, Clock, SystemClock, TokenAuthenticator,
    DEFAULT_EARLY_EXPIRY, DEFAULT_MAX_TTL, MAX_TTL_ENV,
};
pub use error::CredentialError;
pub use fetcher::{AuthorizationData, EcrPublicTokenFetcher, EcrTokenFetcher, TokenFetcher};

use async_trait::async_trait;
use oci_distribution::secrets::RegistryAuth;
use serde::Serialize;
use std::fmt;

/// Registry login credentials
///
/// An empty username and password means anonymous access.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

// Keep the password out of logs
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl From<AuthConfig> for RegistryAuth {
    fn from(auth: AuthConfig) -> Self {
        if auth.is_anonymous() {
            RegistryAuth::Anonymous
        } else {
            RegistryAuth::Basic(auth.username, auth.password)
        }
    }
}

/// Supplies login credentials for one registry credential scope
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Get credentials, fetching fresh ones if needed
    async fn authorization(&self) -> Result<AuthConfig, CredentialError>;

    /// Whether this authenticator never supplies credentials
    fn is_anonymous(&self) -> bool {
        false
    }
}

/// Authenticator for registries without ECR credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl Authenticator for Anonymous {
    async fn authorization(&self) -> Result<AuthConfig, CredentialError> {
        Ok(AuthConfig::default())
    }

    fn is_anonymous(&self) -> bool {
        true
    }
}
