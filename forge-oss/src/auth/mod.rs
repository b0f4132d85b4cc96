//! Bearer token acquisition.
//!
//! The upload pipeline doesn't care how a token is obtained, only that it can ask for one with a
//! particular scope, and that it knows which API host the token is valid for.  That capability is
//! the [`Authenticator`] trait.  There are two implementations, corresponding to the two OAuth
//! flows the platform supports:
//!
//! - [`TwoLeggedAuth`] uses the client credentials grant to act as the application itself.
//! - [`ThreeLeggedAuth`] acts on behalf of a user, with tokens obtained by the caller through the
//!   authorization code flow and handed to this crate via a [`TokenRefreshCallback`].
use crate::Result;
use url::Url;

mod three_legged;
mod two_legged;

pub use three_legged::{StaticAccessToken, ThreeLeggedAuth, TokenRefreshCallback};
pub use two_legged::TwoLeggedAuth;

/// The scope needed for the signed URL and finalize calls
pub const DATA_READ_WRITE_SCOPE: &str = "data:read data:write";

/// The production API host
pub const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";

/// Parse [`DEFAULT_BASE_URL`]
pub fn default_base_url() -> Url {
    DEFAULT_BASE_URL
        .parse()
        .expect("BUG: the default base URL is valid")
}

/// Something that can produce bearer tokens for the API host at [`Self::host_base_path`].
#[async_trait::async_trait]
pub trait Authenticator: std::fmt::Debug + Sync + Send + 'static {
    /// Get an access token with the given (space-separated) scope
    async fn get_token(&self, scope: &str) -> Result<String>;

    /// The base URL of the API host, ie `https://developer.api.autodesk.com`.  All API paths are
    /// relative to this.
    fn host_base_path(&self) -> &Url;
}
