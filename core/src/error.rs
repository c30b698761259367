use std::fmt;
use thiserror::Error;

/// The error type for awsign operations
#[derive(Error, Debug)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<anyhow::Error>,
}

/// The kind of error that occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request cannot be signed (unparseable URI, missing authority, etc.)
    RequestInvalid,

    /// The payload cannot be signed in the requested mode, e.g. a
    /// streaming body whose length cannot be determined.
    PayloadUnsupported,

    /// Deriving a signing key from the credential failed.
    KeyDerivation,

    /// Computing the signature itself failed.
    Signing,

    /// An I/O failure occurred while signing a streaming body; partial
    /// output must be discarded and signing restarted from the source.
    StreamSigning,

    /// The credential/token supplier failed and no fallback applied.
    TokenAcquisition,

    /// Operation attempted on a closed resource.
    ResourceClosed,

    /// An argument was out of its documented domain.
    ArgumentInvalid,

    /// Configuration error (missing fields, invalid values)
    ConfigInvalid,

    /// Unexpected errors (formatting, header conversion, etc.)
    Unexpected,
}

impl Error {
    /// Create a new error with the given kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Check if this error came from the credential/token supply path
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::TokenAcquisition | ErrorKind::KeyDerivation
        )
    }
}

// Convenience constructors
impl Error {
    /// Create a request invalid error
    pub fn request_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RequestInvalid, message)
    }

    /// Create a payload unsupported error
    pub fn payload_unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadUnsupported, message)
    }

    /// Create a key derivation error
    pub fn key_derivation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::KeyDerivation, message)
    }

    /// Create a signing error
    pub fn signing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Signing, message)
    }

    /// Create a stream signing error
    pub fn stream_signing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StreamSigning, message)
    }

    /// Create a token acquisition error
    pub fn token_acquisition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TokenAcquisition, message)
    }

    /// Create a resource closed error
    pub fn resource_closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceClosed, message)
    }

    /// Create an argument invalid error
    pub fn argument_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgumentInvalid, message)
    }

    /// Create a config invalid error
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    /// Create an unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::RequestInvalid => write!(f, "invalid request"),
            ErrorKind::PayloadUnsupported => write!(f, "unsupported payload"),
            ErrorKind::KeyDerivation => write!(f, "key derivation failed"),
            ErrorKind::Signing => write!(f, "signing failed"),
            ErrorKind::StreamSigning => write!(f, "stream signing failed"),
            ErrorKind::TokenAcquisition => write!(f, "token acquisition failed"),
            ErrorKind::ResourceClosed => write!(f, "resource closed"),
            ErrorKind::ArgumentInvalid => write!(f, "invalid argument"),
            ErrorKind::ConfigInvalid => write!(f, "invalid configuration"),
            ErrorKind::Unexpected => write!(f, "unexpected error"),
        }
    }
}

/// Convenience type alias for Results
pub type Result<T> = std::result::Result<T, Error>;

// Common From implementations
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::unexpected(err.to_string()).with_source(err)
    }
}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Self::unexpected(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::Error> for Error {
    fn from(err: http::Error) -> Self {
        Self::request_invalid(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::request_invalid(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::request_invalid(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::header::ToStrError> for Error {
    fn from(err: http::header::ToStrError) -> Self {
        Self::request_invalid(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(err: http::uri::InvalidUri) -> Self {
        Self::request_invalid(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<http::uri::InvalidUriParts> for Error {
    fn from(err: http::uri::InvalidUriParts) -> Self {
        Self::request_invalid(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::unexpected(err.to_string()).with_source(anyhow::Error::from(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::stream_signing(err.to_string()).with_source(anyhow::Error::from(err))
    }
}
