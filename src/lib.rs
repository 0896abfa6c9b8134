//! Cached, automatically refreshed Amazon ECR credentials
//!
//! A [`Keychain`] maps a registry hostname to an [`Authenticator`] for its
//! credential scope. Authenticators fetch an authorization token from ECR (or
//! ECR Public) on first use and serve it from memory until shortly before it
//! expires.
//!
//! ```rust,ignore
//! let keychain = ecr_keychain::default_keychain().await?;
//! let auth = keychain.resolve("123456789012.dkr.ecr.us-west-2.amazonaws.com");
//! let creds = auth.authorization().await?;
//! ```

pub mod auth;
pub mod keychain;
pub mod registry;
pub mod settings;

pub use auth::{
    Anonymous, AuthConfig, Authenticator, AuthenticatorOptions, CredentialError,
    TokenAuthenticator, TokenFetcher,
};
pub use keychain::{
    default_keychain, keychain_from_settings, must_default_keychain, AuthenticatorFactory,
    Keychain, Resource, SdkAuthenticatorFactory,
};
pub use registry::{parse, Partition, RegistryDescriptor};
pub use settings::Settings;
