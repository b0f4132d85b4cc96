//! Three-legged authentication, acting on behalf of a user.
//!
//! The interactive part of the authorization code flow (sending the user to a browser, receiving
//! the redirect) is the caller's business.  This crate only asks the caller for a current token
//! whenever it needs one, through [`TokenRefreshCallback`], so a long-running upload keeps working
//! as long as the callback keeps producing valid tokens.
use super::Authenticator;
use crate::error::BoxedError;
use crate::Result;
use futures::future::BoxFuture;
use snafu::IntoError;
use std::{fmt::Debug, sync::Arc};
use url::Url;

/// A callback that yields a user access token for a scope.
///
/// This is called every time a token is needed, so implementations that talk to a token service
/// should keep their own refresh token and expiry bookkeeping.
pub trait TokenRefreshCallback: Debug + Send + Sync {
    fn access_token<'a>(
        &'a self,
        scope: &'a str,
    ) -> BoxFuture<'a, std::result::Result<String, BoxedError>>;
}

/// A [`TokenRefreshCallback`] that always returns the same token, regardless of the scope.
///
/// Useful for short-lived tools which are handed a token on the command line.
#[derive(Clone)]
pub struct StaticAccessToken(String);

impl StaticAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl Debug for StaticAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticAccessToken").field(&"<...>").finish()
    }
}

impl TokenRefreshCallback for StaticAccessToken {
    fn access_token<'a>(
        &'a self,
        _scope: &'a str,
    ) -> BoxFuture<'a, std::result::Result<String, BoxedError>> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

/// Authenticates as a user, with tokens supplied by a [`TokenRefreshCallback`]
#[derive(Debug, Clone)]
pub struct ThreeLeggedAuth {
    base_url: Url,
    callback: Arc<dyn TokenRefreshCallback>,
}

impl ThreeLeggedAuth {
    pub fn new(base_url: Url, callback: impl TokenRefreshCallback + 'static) -> Self {
        Self {
            base_url,
            callback: Arc::new(callback),
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for ThreeLeggedAuth {
    async fn get_token(&self, scope: &str) -> Result<String> {
        self.callback
            .access_token(scope)
            .await
            .map_err(|source| crate::error::TokenSnafu { scope }.into_error(source))
    }

    fn host_base_path(&self) -> &Url {
        &self.base_url
    }
}
