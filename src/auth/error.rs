use std::time::Duration;
use thiserror::Error;

/// Failure to obtain registry credentials from the token service
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("GetAuthorizationToken failed: {0:#}")]
    Fetch(#[source] anyhow::Error),

    #[error("GetAuthorizationToken returned no authorization data")]
    NoAuthorizationData,

    #[error("GetAuthorizationToken did not complete within {0:?}")]
    Timeout(Duration),

    #[error("GetAuthorizationToken returned an invalid token: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("GetAuthorizationToken returned an invalid token: not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("GetAuthorizationToken returned an invalid token: missing ':'")]
    MissingSeparator,
}

impl CredentialError {
    /// The token service could not be reached or returned nothing usable
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            Self::Fetch(_) | Self::NoAuthorizationData | Self::Timeout(_)
        )
    }

    /// The token service returned a token that could not be decoded
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::InvalidEncoding(_) | Self::InvalidUtf8(_) | Self::MissingSeparator
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(CredentialError::Fetch(anyhow::anyhow!("boom")).is_fetch());
        assert!(CredentialError::NoAuthorizationData.is_fetch());
        assert!(CredentialError::Timeout(Duration::from_secs(1)).is_fetch());
        assert!(CredentialError::MissingSeparator.is_decode());
        assert!(!CredentialError::MissingSeparator.is_fetch());
        assert!(!CredentialError::NoAuthorizationData.is_decode());
    }

    #[test]
    fn test_fetch_error_display_includes_cause() {
        let err = CredentialError::Fetch(
            anyhow::anyhow!("access denied").context("calling us-west-2 endpoint"),
        );
        let msg = err.to_string();
        assert!(msg.contains("GetAuthorizationToken failed"));
        assert!(msg.contains("access denied"));
    }
}
