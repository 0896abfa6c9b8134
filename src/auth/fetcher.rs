//! Clients for the ECR `GetAuthorizationToken` operation

use anyhow::Result;
use async_trait::async_trait;
use aws_config::SdkConfig;
use chrono::{DateTime, Utc};

/// One authorization entry returned by the token service
#[derive(Debug, Clone, Default)]
pub struct AuthorizationData {
    /// Base64 encoded `username:password`
    pub token: Option<String>,
    /// Expiry declared by the token service
    pub expires_at: Option<DateTime<Utc>>,
}

/// Fetches authorization tokens from a token service
///
/// Implementations are bound to one endpoint (region, partition, FIPS mode)
/// when they are created.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch_token(&self) -> Result<Vec<AuthorizationData>>;
}

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let mut end = 200;
        while !debug_str.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &debug_str[..end])
    } else {
        debug_str
    }
}

fn to_utc(timestamp: &aws_sdk_ecr::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

/// Token fetcher for private ECR registries
pub struct EcrTokenFetcher {
    client: aws_sdk_ecr::Client,
}

impl EcrTokenFetcher {
    pub fn new(client: aws_sdk_ecr::Client) -> Self {
        Self { client }
    }

    /// Build a client for `region`, using the FIPS endpoint when `fips` is set
    pub fn from_sdk_config(sdk_config: &SdkConfig, region: &str, fips: bool) -> Self {
        let mut builder = aws_sdk_ecr::config::Builder::from(sdk_config)
            .region(aws_sdk_ecr::config::Region::new(region.to_string()));
        if fips {
            builder = builder.use_fips(true);
        }
        Self::new(aws_sdk_ecr::Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl TokenFetcher for EcrTokenFetcher {
    async fn fetch_token(&self) -> Result<Vec<AuthorizationData>> {
        let output = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("ECR: {}", format_sdk_error(&e)))?;

        Ok(output
            .authorization_data()
            .iter()
            .map(|data| AuthorizationData {
                token: data.authorization_token().map(str::to_string),
                expires_at: data.expires_at().and_then(to_utc),
            })
            .collect())
    }
}

/// Token fetcher for ECR Public
pub struct EcrPublicTokenFetcher {
    client: aws_sdk_ecrpublic::Client,
}

impl EcrPublicTokenFetcher {
    pub fn new(client: aws_sdk_ecrpublic::Client) -> Self {
        Self { client }
    }

    /// Build a client for `region`
    ///
    /// ECR Public has a single global endpoint; the region only configures the client.
    pub fn from_sdk_config(sdk_config: &SdkConfig, region: &str) -> Self {
        let config = aws_sdk_ecrpublic::config::Builder::from(sdk_config)
            .region(aws_sdk_ecrpublic::config::Region::new(region.to_string()))
            .build();
        Self::new(aws_sdk_ecrpublic::Client::from_conf(config))
    }
}

#[async_trait]
impl TokenFetcher for EcrPublicTokenFetcher {
    async fn fetch_token(&self) -> Result<Vec<AuthorizationData>> {
        let output = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("ECR Public: {}", format_sdk_error(&e)))?;

        Ok(output
            .authorization_data()
            .map(|data| AuthorizationData {
                token: data.authorization_token().map(str::to_string),
                expires_at: data.expires_at().and_then(to_utc),
            })
            .into_iter()
            .collect())
    }
}
