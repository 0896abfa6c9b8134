//! Keychain resolving registry hosts to cached ECR authenticators
//!
//! One authenticator is kept per credential scope (domain suffix, region and
//! FIPS mode), so every image in the same regional registry shares a token.

use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, SdkConfig};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::{
    max_ttl_from_env, Anonymous, Authenticator, AuthenticatorOptions, CredentialError,
    EcrPublicTokenFetcher, EcrTokenFetcher, TokenAuthenticator,
};
use crate::registry::{self, RegistryDescriptor};
use crate::settings::Settings;

/// Something that names a registry
pub trait Resource {
    /// Registry hostname, without scheme or path
    fn registry_str(&self) -> &str;
}

impl Resource for str {
    fn registry_str(&self) -> &str {
        self
    }
}

impl Resource for String {
    fn registry_str(&self) -> &str {
        self
    }
}

impl Resource for Reference {
    fn registry_str(&self) -> &str {
        self.registry()
    }
}

/// Builds the authenticator for a registry credential scope
pub trait AuthenticatorFactory: Send + Sync {
    fn create(&self, registry: &RegistryDescriptor) -> Arc<dyn Authenticator>;
}

/// Factory creating SDK-backed token authenticators
///
/// Private registries get a region-scoped ECR client (FIPS endpoint when the
/// host asks for it) and honour `max_ttl`; ECR Public gets an ECR Public client
/// and is cached for as long as the server allows.
pub struct SdkAuthenticatorFactory {
    sdk_config: SdkConfig,
    options: AuthenticatorOptions,
}

impl SdkAuthenticatorFactory {
    pub fn new(sdk_config: &SdkConfig, options: AuthenticatorOptions) -> Self {
        Self {
            sdk_config: sdk_config.clone(),
            options,
        }
    }
}

impl AuthenticatorFactory for SdkAuthenticatorFactory {
    fn create(&self, registry: &RegistryDescriptor) -> Arc<dyn Authenticator> {
        let scope = registry.cache_key();
        let authenticator = if registry.is_public() {
            TokenAuthenticator::new(
                EcrPublicTokenFetcher::from_sdk_config(&self.sdk_config, &registry.region),
                self.options.clone().with_max_ttl(None),
            )
        } else {
            TokenAuthenticator::new(
                EcrTokenFetcher::from_sdk_config(&self.sdk_config, &registry.region, registry.fips),
                self.options.clone(),
            )
        };
        Arc::new(authenticator.with_scope(scope))
    }
}

/// Maps registry hosts to authenticators, creating at most one per credential scope
pub struct Keychain {
    factory: Box<dyn AuthenticatorFactory>,
    cache: RwLock<HashMap<String, Arc<dyn Authenticator>>>,
    anonymous: Arc<dyn Authenticator>,
}

impl Keychain {
    /// Keychain with the default early expiry and the max TTL from `ECR_TOKEN_MAX_TTL`
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self::with_options(
            sdk_config,
            AuthenticatorOptions::default().with_max_ttl(Some(max_ttl_from_env())),
        )
    }

    /// Like [`Keychain::new`] with a custom early-expiry margin
    pub fn with_early_expiry(sdk_config: &SdkConfig, early_expiry: Duration) -> Self {
        Self::with_options(
            sdk_config,
            AuthenticatorOptions::default()
                .with_early_expiry(early_expiry)
                .with_max_ttl(Some(max_ttl_from_env())),
        )
    }

    pub fn with_options(sdk_config: &SdkConfig, options: AuthenticatorOptions) -> Self {
        Self::with_factory(SdkAuthenticatorFactory::new(sdk_config, options))
    }

    pub fn with_factory(factory: impl AuthenticatorFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            cache: RwLock::new(HashMap::new()),
            anonymous: Arc::new(Anonymous),
        }
    }

    /// Get the authenticator for a registry
    ///
    /// Hosts that are not ECR registries resolve to an anonymous authenticator.
    /// Repeated calls for the same credential scope return the same instance.
    pub fn resolve<R: Resource + ?Sized>(&self, resource: &R) -> Arc<dyn Authenticator> {
        let host = resource.registry_str();
        let Some(registry) = registry::parse(host) else {
            debug!("{} is not an ECR registry, using anonymous access", host);
            return Arc::clone(&self.anonymous);
        };

        let key = registry.cache_key();
        if let Some(auth) = self.cache.read().get(&key) {
            return Arc::clone(auth);
        }

        // Built outside the lock; a concurrent caller may get there first
        let auth = self.factory.create(&registry);

        match self.cache.write().entry(key) {
            Entry::Occupied(existing) => {
                debug!(
                    "Authenticator for {} was created concurrently, discarding ours",
                    existing.key()
                );
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                debug!("Created authenticator for {}", slot.key());
                Arc::clone(slot.insert(auth))
            }
        }
    }

    /// Resolve and authenticate in one step, producing registry client auth
    pub async fn registry_auth<R: Resource + ?Sized>(
        &self,
        resource: &R,
    ) -> Result<RegistryAuth, CredentialError> {
        let auth = self.resolve(resource);
        Ok(auth.authorization().await?.into())
    }

    /// Number of credential scopes with an authenticator
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build a keychain from settings and the default AWS credential chain
pub async fn keychain_from_settings(settings: &Settings) -> Keychain {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &settings.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }
    if let Some(profile) = &settings.profile {
        loader = loader.profile_name(profile);
    }
    let sdk_config = loader.load().await;

    Keychain::with_options(&sdk_config, settings.authenticator_options())
}

/// Keychain using the default AWS credential chain and settings from the environment
pub async fn default_keychain() -> Result<Keychain> {
    let settings = Settings::new().context("Failed to load keychain settings")?;
    Ok(keychain_from_settings(&settings).await)
}

/// Like [`default_keychain`] but panics on error
pub async fn must_default_keychain() -> Keychain {
    match default_keychain().await {
        Ok(keychain) => keychain,
        Err(e) => panic!("Failed to create default ECR keychain: {:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Barrier;

    struct StaticAuthenticator(AuthConfig);

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        async fn authorization(&self) -> Result<AuthConfig, CredentialError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingFactory {
        created: Arc<Mutex<Vec<RegistryDescriptor>>>,
    }

    impl RecordingFactory {
        fn created(&self) -> Vec<RegistryDescriptor> {
            self.created.lock().clone()
        }
    }

    impl AuthenticatorFactory for RecordingFactory {
        fn create(&self, registry: &RegistryDescriptor) -> Arc<dyn Authenticator> {
            self.created.lock().push(registry.clone());
            Arc::new(StaticAuthenticator(AuthConfig::new(
                "AWS",
                registry.cache_key(),
            )))
        }
    }

    const PRIVATE_HOST: &str = "123456789012.dkr.ecr.us-west-2.amazonaws.com";

    #[test]
    fn test_resolve_is_idempotent() {
        let factory = RecordingFactory::default();
        let keychain = Keychain::with_factory(factory.clone());

        let first = keychain.resolve(PRIVATE_HOST);
        let second = keychain.resolve(PRIVATE_HOST);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created().len(), 1);
        assert_eq!(keychain.len(), 1);
    }

    #[test]
    fn test_accounts_in_same_region_share_authenticator() {
        let keychain = Keychain::with_factory(RecordingFactory::default());

        let a = keychain.resolve("111111111111.dkr.ecr.us-west-2.amazonaws.com");
        let b = keychain.resolve("222222222222.dkr.ecr.us-west-2.amazonaws.com");
        let other_region = keychain.resolve("111111111111.dkr.ecr.eu-central-1.amazonaws.com");
        let fips = keychain.resolve("111111111111.dkr.ecr-fips.us-west-2.amazonaws.com");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other_region));
        assert!(!Arc::ptr_eq(&a, &fips));
        assert_eq!(keychain.len(), 3);
    }

    #[test]
    fn test_concurrent_resolve_publishes_one_instance() {
        let factory = RecordingFactory::default();
        let keychain = Arc::new(Keychain::with_factory(factory.clone()));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let keychain = Arc::clone(&keychain);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    keychain.resolve(PRIVATE_HOST)
                })
            })
            .collect();

        let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for auth in &resolved {
            assert!(Arc::ptr_eq(auth, &resolved[0]));
        }
        assert!(Arc::ptr_eq(&resolved[0], &keychain.resolve(PRIVATE_HOST)));
        assert_eq!(keychain.len(), 1);
        assert!(!factory.created().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_registry_is_anonymous() {
        let factory = RecordingFactory::default();
        let keychain = Keychain::with_factory(factory.clone());

        let auth = keychain.resolve("docker.io");
        assert!(auth.is_anonymous());
        assert!(auth.authorization().await.unwrap().is_anonymous());
        assert!(factory.created().is_empty());
        assert!(keychain.is_empty());
    }

    #[test]
    fn test_public_and_fips_descriptors_reach_factory() {
        let factory = RecordingFactory::default();
        let keychain = Keychain::with_factory(factory.clone());

        keychain.resolve("public.ecr.aws");
        keychain.resolve("999.dkr-fips.ecr.us-gov-west-1.amazonaws.com");

        let created = factory.created();
        assert_eq!(created.len(), 2);
        assert!(created[0].is_public());
        assert!(!created[1].is_public());
        assert!(created[1].fips);
        assert_eq!(created[1].region, "us-gov-west-1");
    }

    #[tokio::test]
    async fn test_registry_auth_from_image_reference() {
        let keychain = Keychain::with_factory(RecordingFactory::default());

        let image: Reference = format!("{}/app:latest", PRIVATE_HOST).parse().unwrap();
        match keychain.registry_auth(&image).await.unwrap() {
            RegistryAuth::Basic(username, password) => {
                assert_eq!(username, "AWS");
                assert_eq!(password, "amazonaws.com/us-west-2/false");
            }
            _ => panic!("Expected Basic auth for ECR"),
        }

        let hub: Reference = "ghcr.io/owner/repo:tag".parse().unwrap();
        assert!(matches!(
            keychain.registry_auth(&hub).await.unwrap(),
            RegistryAuth::Anonymous
        ));
    }

    #[tokio::test]
    async fn test_sdk_factory_memoizes_token_authenticators() {
        let sdk_config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .build();
        let keychain = Keychain::with_options(&sdk_config, AuthenticatorOptions::default());

        let private = keychain.resolve(PRIVATE_HOST);
        let public = keychain.resolve("public.ecr.aws");

        assert!(!private.is_anonymous());
        assert!(!public.is_anonymous());
        assert!(Arc::ptr_eq(&private, &keychain.resolve(PRIVATE_HOST)));
        assert!(!Arc::ptr_eq(&private, &public));
        assert_eq!(keychain.len(), 2);
    }
}
