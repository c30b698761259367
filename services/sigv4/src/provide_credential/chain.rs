use std::fmt::{self, Debug};

use async_trait::async_trait;
use awsign_core::{ProvideCredential, Result};

use crate::Credential;

/// A chain of credential providers that will be tried in order.
///
/// The first provider that returns a credential wins; a provider that
/// fails is logged and skipped so a broken source never shadows a
/// working one later in the chain.
pub struct ProvideCredentialChain {
    providers: Vec<Box<dyn ProvideCredential<Credential = Credential>>>,
}

impl ProvideCredentialChain {
    /// Create a new empty credential provider chain.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Add a credential provider to the chain.
    pub fn push(
        mut self,
        provider: impl ProvideCredential<Credential = Credential> + 'static,
    ) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Create a credential provider chain from a vector of providers.
    pub fn from_vec(providers: Vec<Box<dyn ProvideCredential<Credential = Credential>>>) -> Self {
        Self { providers }
    }
}

impl Default for ProvideCredentialChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ProvideCredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvideCredentialChain")
            .field("providers_count", &self.providers.len())
            .finish()
    }
}

#[async_trait]
impl ProvideCredential for ProvideCredentialChain {
    type Credential = Credential;

    async fn provide_credential(&self) -> Result<Option<Self::Credential>> {
        for provider in &self.providers {
            log::debug!("trying credential provider: {provider:?}");

            match provider.provide_credential().await {
                Ok(Some(cred)) => {
                    log::debug!("loaded credential from provider: {provider:?}");
                    return Ok(Some(cred));
                }
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("credential provider {provider:?} failed: {err:?}, trying next");
                    continue;
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FailingProvider;

    #[async_trait]
    impl ProvideCredential for FailingProvider {
        type Credential = Credential;

        async fn provide_credential(&self) -> Result<Option<Credential>> {
            Err(awsign_core::Error::unexpected("provider down"))
        }
    }

    #[derive(Debug)]
    struct EmptyProvider;

    #[async_trait]
    impl ProvideCredential for EmptyProvider {
        type Credential = Credential;

        async fn provide_credential(&self) -> Result<Option<Credential>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_first_credential_wins() -> anyhow::Result<()> {
        let chain = ProvideCredentialChain::new()
            .push(EmptyProvider)
            .push(crate::StaticCredentialProvider::new("first_key", "first_secret"))
            .push(crate::StaticCredentialProvider::new("second_key", "second_secret"));

        let cred = chain.provide_credential().await?.unwrap();
        assert_eq!(cred.access_key_id, "first_key");
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_provider_is_skipped() -> anyhow::Result<()> {
        let chain = ProvideCredentialChain::new()
            .push(FailingProvider)
            .push(crate::StaticCredentialProvider::new("fallback_key", "fallback_secret"));

        let cred = chain.provide_credential().await?.unwrap();
        assert_eq!(cred.access_key_id, "fallback_key");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_chain_is_anonymous() -> anyhow::Result<()> {
        let chain = ProvideCredentialChain::new();
        assert!(chain.provide_credential().await?.is_none());
        Ok(())
    }
}
