//! Caching authenticator backed by the ECR token service
//!
//! Tokens are fetched lazily and kept in a single atomically swapped slot.
//! Readers load the slot without locking; a refresh builds a complete new
//! snapshot and stores it over whatever is there. Concurrent callers that all
//! see an expired slot each fetch on their own and the last store wins, which
//! is fine because every freshly issued token is valid.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{AuthConfig, Authenticator, CredentialError, TokenFetcher};

/// Default margin subtracted from a token's declared expiry
pub const DEFAULT_EARLY_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Default upper bound on how long a private registry token is cached
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(60 * 60);

/// Environment variable overriding the max token lifetime, in minutes
pub const MAX_TTL_ENV: &str = "ECR_TOKEN_MAX_TTL";

/// Read the max token lifetime from `ECR_TOKEN_MAX_TTL`
///
/// Falls back to [`DEFAULT_MAX_TTL`] when the variable is unset or not a
/// whole number of minutes.
pub fn max_ttl_from_env() -> Duration {
    max_ttl_from(std::env::var(MAX_TTL_ENV).ok().as_deref())
}

fn max_ttl_from(value: Option<&str>) -> Duration {
    let Some(value) = value else {
        return DEFAULT_MAX_TTL;
    };
    parse_max_ttl_minutes(value).unwrap_or_else(|| {
        warn!(
            "Ignoring invalid {}={:?}, using {} minutes",
            MAX_TTL_ENV,
            value,
            DEFAULT_MAX_TTL.as_secs() / 60
        );
        DEFAULT_MAX_TTL
    })
}

pub(crate) fn parse_max_ttl_minutes(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cache tuning for a [`TokenAuthenticator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorOptions {
    /// Credentials are treated as expired this long before the declared expiry
    pub early_expiry: Duration,
    /// Credentials are never cached longer than this, whatever the server declares
    pub max_ttl: Option<Duration>,
    /// Upper bound on a single token fetch
    pub fetch_timeout: Option<Duration>,
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        Self {
            early_expiry: DEFAULT_EARLY_EXPIRY,
            max_ttl: None,
            fetch_timeout: None,
        }
    }
}

impl AuthenticatorOptions {
    pub fn with_early_expiry(mut self, early_expiry: Duration) -> Self {
        self.early_expiry = early_expiry;
        self
    }

    pub fn with_max_ttl(mut self, max_ttl: Option<Duration>) -> Self {
        self.max_ttl = max_ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Option<Duration>) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }
}

/// Published credentials; never modified after being stored
#[derive(Debug)]
struct CachedCredential {
    credential: AuthConfig,
    expires_at: DateTime<Utc>,
}

/// Authenticator that caches ECR authorization tokens until shortly before they expire
pub struct TokenAuthenticator {
    scope: String,
    fetcher: Box<dyn TokenFetcher>,
    options: AuthenticatorOptions,
    clock: Arc<dyn Clock>,
    cache: ArcSwapOption<CachedCredential>,
}

impl TokenAuthenticator {
    pub fn new(fetcher: impl TokenFetcher + 'static, options: AuthenticatorOptions) -> Self {
        Self {
            scope: String::new(),
            fetcher: Box::new(fetcher),
            options,
            clock: Arc::new(SystemClock),
            cache: ArcSwapOption::empty(),
        }
    }

    /// Label used in log messages, typically the registry cache key
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &AuthenticatorOptions {
        &self.options
    }

    /// Currently cached credentials, if they have not expired
    pub fn cached(&self) -> Option<AuthConfig> {
        let guard = self.cache.load();
        match &*guard {
            Some(cached) if self.clock.now() < cached.expires_at => {
                Some(cached.credential.clone())
            }
            _ => None,
        }
    }

    /// Effective expiry of the cached credentials, expired or not
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.cache.load_full().map(|cached| cached.expires_at)
    }

    /// Drop the cached credentials so the next call fetches new ones
    pub fn invalidate(&self) {
        self.cache.store(None);
    }

    async fn fetch(&self) -> Result<Vec<super::AuthorizationData>, CredentialError> {
        let result = match self.options.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch_token())
                .await
                .map_err(|_| CredentialError::Timeout(limit))?,
            None => self.fetcher.fetch_token().await,
        };
        result.map_err(CredentialError::Fetch)
    }

    async fn refresh(&self) -> Result<AuthConfig, CredentialError> {
        let data = self.fetch().await?;
        let first = data.into_iter().next().ok_or(CredentialError::NoAuthorizationData)?;
        let token = first.token.ok_or(CredentialError::NoAuthorizationData)?;
        let credential = decode_token(&token)?;

        let now = self.clock.now();
        let expires_at = effective_expiry(
            now,
            first.expires_at.unwrap_or(now),
            self.options.early_expiry,
            self.options.max_ttl,
        );

        info!(
            "Cached ECR credentials for {} until {}",
            self.scope,
            expires_at.to_rfc3339()
        );
        self.cache.store(Some(Arc::new(CachedCredential {
            credential: credential.clone(),
            expires_at,
        })));

        Ok(credential)
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authorization(&self) -> Result<AuthConfig, CredentialError> {
        if let Some(cached) = self.cached() {
            return Ok(cached);
        }

        debug!("No valid cached ECR credentials for {}, fetching", self.scope);
        self.refresh().await.inspect_err(|e| {
            warn!("Failed to get ECR credentials for {}: {}", self.scope, e);
        })
    }
}

/// Decode a base64 `username:password` token
pub(crate) fn decode_token(token: &str) -> Result<AuthConfig, CredentialError> {
    let decoded = base64::engine::general_purpose::STANDARD.decode(token)?;
    let decoded = String::from_utf8(decoded)?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or(CredentialError::MissingSeparator)?;
    Ok(AuthConfig::new(username, password))
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Apply the early-expiry margin, then clamp to `now + max_ttl`
fn effective_expiry(
    now: DateTime<Utc>,
    declared: DateTime<Utc>,
    early_expiry: Duration,
    max_ttl: Option<Duration>,
) -> DateTime<Utc> {
    let expires_at = declared
        .checked_sub_signed(to_delta(early_expiry))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    match max_ttl.and_then(|ttl| now.checked_add_signed(to_delta(ttl))) {
        Some(limit) if limit < expires_at => limit,
        _ => expires_at,
    }
}
