//! AWS SigV4/SigV4a request signing.
//!
//! This crate implements AWS [Signature Version 4](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
//! and its asymmetric multi-region variant SigV4a on top of the
//! `awsign-core` building blocks: header signing, presigned URLs,
//! aws-chunked streaming bodies, and event-stream messages.
//!
//! ## Example
//!
//! ```no_run
//! use awsign_core::{Result, Signer};
//! use awsign_sigv4::{RequestSigner, StaticCredentialProvider};
//!
//! # async fn example() -> Result<()> {
//! let provider = StaticCredentialProvider::new("access_key_id", "secret_access_key");
//! let builder = RequestSigner::new("s3", "us-east-1")
//!     .with_double_uri_encode(false)
//!     .with_normalize_uri_path(false)
//!     .with_content_sha256_header(true);
//! let signer = Signer::new(provider, builder);
//!
//! let mut parts = http::Request::builder()
//!     .method("GET")
//!     .uri("https://s3.amazonaws.com/test.txt")
//!     .body(())
//!     .unwrap()
//!     .into_parts()
//!     .0;
//!
//! signer.sign(&mut parts, None).await?;
//! # Ok(())
//! # }
//! ```

mod constants;

mod credential;
pub use credential::Credential;

mod canonical;
pub use canonical::SignableBody;

mod key;
pub use key::FifoCache;

mod sign_request;
pub use sign_request::RequestSigner;
pub use sign_request::SignatureVersion;
pub use sign_request::SignedOutput;

mod chunked;
pub use chunked::encoded_length;
pub use chunked::ChecksumAlgorithm;
pub use chunked::ChunkSigner;
pub use chunked::ChunkedStream;
pub use chunked::DEFAULT_CHUNK_SIZE;

mod event_stream;
pub use event_stream::EventHeaderValue;
pub use event_stream::EventSigner;
pub use event_stream::SignedEvent;

mod provide_credential;
pub use provide_credential::ProvideCredentialChain;
pub use provide_credential::StaticCredentialProvider;
