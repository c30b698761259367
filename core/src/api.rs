use std::fmt::Debug;
use std::time::Duration;

use crate::time::DateTime;
use crate::Result;

/// SigningCredential is implemented by the credential/identity types a
/// signer consumes.
pub trait SigningCredential: Clone + Debug + Send + Sync + Unpin + 'static {
    /// Check if the credential is still usable for signing.
    fn is_valid(&self) -> bool;

    /// Absolute expiration of this credential, if it has one.
    ///
    /// Credentials without an expiration are refreshed on every use by
    /// caching layers.
    fn expires_at(&self) -> Option<DateTime> {
        None
    }
}

impl<T: SigningCredential> SigningCredential for Option<T> {
    fn is_valid(&self) -> bool {
        let Some(cred) = self else {
            return false;
        };

        cred.is_valid()
    }

    fn expires_at(&self) -> Option<DateTime> {
        self.as_ref().and_then(|c| c.expires_at())
    }
}

/// ProvideCredential is the supplier abstraction for credentials and
/// tokens.
///
/// Returning `Ok(None)` means no credential is available and the caller
/// should proceed anonymously; it is an ordinary, non-error outcome.
#[async_trait::async_trait]
pub trait ProvideCredential: Debug + Send + Sync + 'static {
    /// Credential returned by this provider.
    type Credential: SigningCredential;

    /// Resolve a credential from wherever this provider sources it.
    async fn provide_credential(&self) -> Result<Option<Self::Credential>>;
}

/// SignRequest is the trait used by signer to build the signing request.
#[async_trait::async_trait]
pub trait SignRequest: Debug + Send + Sync + 'static {
    /// Credential used by this builder.
    type Credential: SigningCredential;

    /// Sign the request in place.
    ///
    /// ## Credential
    ///
    /// `None` means the caller is anonymous; implementations return the
    /// request unmodified rather than failing.
    ///
    /// ## Expires In
    ///
    /// `Some(_)` selects query signing (a presigned request) valid for
    /// the given duration; `None` selects header signing.
    async fn sign_request(
        &self,
        req: &mut http::request::Parts,
        credential: Option<&Self::Credential>,
        expires_in: Option<Duration>,
    ) -> Result<()>;
}
