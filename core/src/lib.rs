//! Core components for signing API requests.
//!
//! This crate provides the foundational types for the awsign workspace:
//! the request-signing traits, the credential cache with single-flight
//! refresh, backoff strategies, and the shared hash/time utilities.
//!
//! ## Overview
//!
//! - **Traits**: [`ProvideCredential`] supplies credentials/tokens,
//!   [`SignRequest`] applies a service-specific signature, and
//!   [`SigningCredential`] lets caching layers reason about validity and
//!   expiration.
//! - **Cache**: [`CachedCredentialProvider`] keeps resolved credentials
//!   until a stale threshold, refreshes them behind a single-flight
//!   lock, and can prefetch replacements in the background.
//! - **Signer**: the orchestrator tying a cached provider to a request
//!   builder.
//!
//! ## Example
//!
//! ```no_run
//! use awsign_core::{ProvideCredential, Result, SignRequest, Signer, SigningCredential};
//! use async_trait::async_trait;
//! use std::time::Duration;
//!
//! #[derive(Clone, Debug)]
//! struct MyCredential {
//!     key: String,
//!     secret: String,
//! }
//!
//! impl SigningCredential for MyCredential {
//!     fn is_valid(&self) -> bool {
//!         !self.key.is_empty() && !self.secret.is_empty()
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct MyProvider;
//!
//! #[async_trait]
//! impl ProvideCredential for MyProvider {
//!     type Credential = MyCredential;
//!
//!     async fn provide_credential(&self) -> Result<Option<Self::Credential>> {
//!         Ok(Some(MyCredential {
//!             key: "my-access-key".to_string(),
//!             secret: "my-secret-key".to_string(),
//!         }))
//!     }
//! }
//!
//! #[derive(Debug)]
//! struct MyBuilder;
//!
//! #[async_trait]
//! impl SignRequest for MyBuilder {
//!     type Credential = MyCredential;
//!
//!     async fn sign_request(
//!         &self,
//!         _req: &mut http::request::Parts,
//!         _credential: Option<&Self::Credential>,
//!         _expires_in: Option<Duration>,
//!     ) -> Result<()> {
//!         // Apply your signature here
//!         todo!()
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let signer = Signer::new(MyProvider, MyBuilder);
//!
//! let mut parts = http::Request::builder()
//!     .method("GET")
//!     .uri("https://example.com")
//!     .body(())
//!     .unwrap()
//!     .into_parts()
//!     .0;
//!
//! signer.sign(&mut parts, None).await?;
//! # Ok(())
//! # }
//! ```

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

pub mod backoff;
pub mod hash;
pub mod time;
pub mod utils;

mod error;
pub use error::{Error, ErrorKind, Result};

mod api;
pub use api::{ProvideCredential, SignRequest, SigningCredential};
mod cache;
pub use cache::{CachedCredentialProvider, FallbackPolicy, DEFAULT_STALE_DURATION};
mod request;
pub use request::{SigningMethod, SigningRequest};
mod signer;
pub use signer::Signer;
