use std::time::Duration;

use crate::cache::CachedCredentialProvider;
use crate::Result;
use crate::SignRequest;
use crate::SigningCredential;
use std::sync::Arc;

/// Signer is the main struct used to sign the request.
///
/// It resolves a credential through a [`CachedCredentialProvider`] and
/// hands it to the service-specific [`SignRequest`] implementation.
#[derive(Clone, Debug)]
pub struct Signer<C: SigningCredential> {
    cache: CachedCredentialProvider<C>,
    builder: Arc<dyn SignRequest<Credential = C>>,
}

impl<C: SigningCredential> Signer<C> {
    /// Create a new signer from a provider wrapped in a cache with
    /// default thresholds.
    pub fn new(
        provider: impl crate::ProvideCredential<Credential = C>,
        builder: impl SignRequest<Credential = C>,
    ) -> Self {
        Self {
            cache: CachedCredentialProvider::new(provider),
            builder: Arc::new(builder),
        }
    }

    /// Create a new signer from an already configured cache.
    pub fn with_cache(
        cache: CachedCredentialProvider<C>,
        builder: impl SignRequest<Credential = C>,
    ) -> Self {
        Self {
            cache,
            builder: Arc::new(builder),
        }
    }

    /// Signing request.
    pub async fn sign(
        &self,
        req: &mut http::request::Parts,
        expires_in: Option<Duration>,
    ) -> Result<()> {
        let credential = self.cache.get().await?;

        self.builder
            .sign_request(req, credential.as_ref(), expires_in)
            .await
    }

    /// Release the cache's background resources.
    pub fn close(&self) {
        self.cache.close();
    }
}
