use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::{Read, Write};
use tracing::debug;

use ecr_keychain::Keychain;

/// Response body of the Docker credential helper `get` command
#[derive(Debug, Serialize)]
pub struct HelperCredentials {
    #[serde(rename = "ServerURL")]
    pub server_url: String,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Secret")]
    pub secret: String,
}

/// Registry host of a server URL as passed by Docker
///
/// Examples:
/// - "https://1.dkr.ecr.us-west-2.amazonaws.com" -> "1.dkr.ecr.us-west-2.amazonaws.com"
/// - "public.ecr.aws/v2/" -> "public.ecr.aws"
pub fn server_host(server_url: &str) -> &str {
    let trimmed = server_url.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
}

/// Look up credentials for `server_url`
pub async fn get_credentials(keychain: &Keychain, server_url: &str) -> Result<HelperCredentials> {
    let host = server_host(server_url);
    let authenticator = keychain.resolve(host);
    if authenticator.is_anonymous() {
        // Docker treats this exact message as "no credentials", not a failure
        bail!("credentials not found in native keychain");
    }

    debug!("Getting ECR credentials for {}", host);
    let auth = authenticator
        .authorization()
        .await
        .with_context(|| format!("Failed to get credentials for {}", host))?;

    Ok(HelperCredentials {
        server_url: server_url.trim().to_string(),
        username: auth.username,
        secret: auth.password,
    })
}

/// Write a helper error to `out`
///
/// Docker reads helper failures from stdout and matches the not-found message
/// verbatim, so errors go there rather than to stderr.
pub fn report_error<W: Write>(out: &mut W, err: &anyhow::Error) -> Result<()> {
    writeln!(out, "{:#}", err)?;
    out.flush()?;
    Ok(())
}

/// Handle `get`: read the server URL from `input` and write credentials as JSON
///
/// On failure the error message is written to `out` and the error returned so
/// the caller can exit non-zero.
pub async fn handle_get<R: Read, W: Write>(
    keychain: &Keychain,
    mut input: R,
    out: &mut W,
) -> Result<()> {
    let mut server_url = String::new();
    let result = match input.read_to_string(&mut server_url) {
        Ok(_) => get_credentials(keychain, &server_url).await,
        Err(e) => Err(anyhow::Error::new(e).context("Failed to read server URL from stdin")),
    };

    match result {
        Ok(credentials) => {
            writeln!(out, "{}", serde_json::to_string(&credentials)?)?;
            out.flush()?;
            Ok(())
        }
        Err(err) => {
            report_error(out, &err)?;
            Err(err)
        }
    }
}

/// Handle `parse`: print the registry descriptor for a host
pub fn handle_parse(host: &str) -> Result<()> {
    match ecr_keychain::parse(server_host(host)) {
        Some(registry) => println!("{}", serde_json::to_string_pretty(&registry)?),
        None => bail!("{} is not an ECR registry", host),
    }
    Ok(())
}
