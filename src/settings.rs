use config::{Config, ConfigError};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::{AuthenticatorOptions, MAX_TTL_ENV};

lazy_static::lazy_static! {
    static ref ENV_VAR_PATTERN: regex::Regex =
        regex::Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("env var pattern is valid");
}

/// Keychain settings
///
/// Loaded from `keychain.{toml,yaml,yml}` in `ECR_KEYCHAIN_CONFIG_DIR` (default
/// `config`), then from `ECR_KEYCHAIN__*` environment variables, then from the
/// legacy `ECR_TOKEN_MAX_TTL` variable.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// Seconds before the declared token expiry at which credentials are refreshed
    #[serde(default = "default_early_expiry_secs")]
    pub early_expiry_secs: u64,

    /// Maximum minutes a private registry token is cached
    #[serde(default = "default_max_ttl_minutes")]
    pub max_ttl_minutes: u64,

    /// Timeout in seconds for a single GetAuthorizationToken call
    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,

    /// AWS region used when none is configured in the environment
    #[serde(default)]
    pub region: Option<String>,

    /// AWS shared config profile
    #[serde(default)]
    pub profile: Option<String>,
}

fn default_early_expiry_secs() -> u64 {
    900 // 15 minutes
}

fn default_max_ttl_minutes() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            early_expiry_secs: default_early_expiry_secs(),
            max_ttl_minutes: default_max_ttl_minutes(),
            fetch_timeout_secs: None,
            region: None,
            profile: None,
        }
    }
}

impl Settings {
    /// Expand `${VAR}` and `${VAR:-default}` references from the environment
    fn expand_env_refs(s: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(s, |caps: &regex::Captures| {
                env::var(&caps[1])
                    .ok()
                    .or_else(|| caps.get(2).map(|m| m.as_str().to_string()))
                    .unwrap_or_default()
            })
            .into_owned()
    }

    /// Convert a merged config value to JSON, expanding env references in strings
    fn to_json(key: &str, value: &config::Value) -> Result<serde_json::Value, ConfigError> {
        use config::ValueKind;
        use serde_json::Value;

        let out_of_range = || ConfigError::Message(format!("{}: integer out of range", key));
        Ok(match &value.kind {
            ValueKind::Nil => Value::Null,
            ValueKind::Boolean(b) => Value::Bool(*b),
            ValueKind::I64(i) => Value::from(*i),
            ValueKind::U64(u) => Value::from(*u),
            ValueKind::I128(i) => Value::from(i64::try_from(*i).map_err(|_| out_of_range())?),
            ValueKind::U128(u) => Value::from(u64::try_from(*u).map_err(|_| out_of_range())?),
            ValueKind::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueKind::String(s) => Value::String(Self::expand_env_refs(s)),
            ValueKind::Table(table) => Value::Object(
                table
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Self::to_json(k, v)?)))
                    .collect::<Result<_, ConfigError>>()?,
            ),
            ValueKind::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| Self::to_json(key, v))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Path stem of the first `keychain.{toml,yaml,yml}` found in `config_dir`
    fn find_config_file(config_dir: &Path) -> Option<PathBuf> {
        let stem = config_dir.join("keychain");
        let found = ["toml", "yaml", "yml"]
            .iter()
            .any(|ext| stem.with_extension(ext).exists());
        if !found {
            tracing::debug!(
                "No keychain.{{toml,yaml,yml}} in {}, using defaults",
                config_dir.display()
            );
        }
        found.then_some(stem)
    }

    /// Source for `ECR_KEYCHAIN__*` environment variables
    fn environment() -> config::Environment {
        config::Environment::with_prefix("ECR_KEYCHAIN")
            .separator("__")
            .try_parsing(true)
    }

    /// Load settings from the config directory and the environment
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir =
            env::var("ECR_KEYCHAIN_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let mut settings = Self::load_from(&config_dir)?;
        settings.apply_legacy_max_ttl(env::var(MAX_TTL_ENV).ok().as_deref());
        Ok(settings)
    }

    /// Load settings from `config_dir` and `ECR_KEYCHAIN__*` environment variables
    pub fn load_from(config_dir: &str) -> Result<Self, ConfigError> {
        Self::load(Path::new(config_dir), Self::environment())
    }

    fn load(config_dir: &Path, environment: config::Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(stem) = Self::find_config_file(config_dir) {
            tracing::info!("Loading config file: {}", stem.display());
            builder = builder.add_source(config::File::with_name(&stem.to_string_lossy()));
        }

        let table = builder
            .add_source(environment)
            .build()?
            .cache
            .into_table()
            .map_err(|e| ConfigError::Message(format!("Failed to get config table: {}", e)))?;

        let json = table
            .iter()
            .map(|(k, v)| Ok((k.clone(), Self::to_json(k, v)?)))
            .collect::<Result<serde_json::Map<_, _>, ConfigError>>()?;

        serde_json::from_value(serde_json::Value::Object(json))
            .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))
    }

    /// Let `ECR_TOKEN_MAX_TTL` (minutes) override `max_ttl_minutes`
    fn apply_legacy_max_ttl(&mut self, value: Option<&str>) {
        let Some(value) = value else {
            return;
        };
        match crate::auth::authenticator::parse_max_ttl_minutes(value) {
            Some(ttl) => self.max_ttl_minutes = ttl.as_secs() / 60,
            None => tracing::warn!("Ignoring invalid {}={:?}", MAX_TTL_ENV, value),
        }
    }

    pub fn authenticator_options(&self) -> AuthenticatorOptions {
        AuthenticatorOptions::default()
            .with_early_expiry(Duration::from_secs(self.early_expiry_secs))
            .with_max_ttl(Some(Duration::from_secs(
                self.max_ttl_minutes.saturating_mul(60),
            )))
            .with_fetch_timeout(self.fetch_timeout_secs.map(Duration::from_secs))
    }
}
