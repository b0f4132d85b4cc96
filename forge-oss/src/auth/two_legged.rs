//! Two-legged (client credentials) authentication.
//!
//! Every call to [`Authenticator::get_token`] requests a brand new token from the authentication
//! service; tokens are not cached.
use super::Authenticator;
use crate::transport::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::Result;
use base64::Engine as _;
use http::{header, HeaderValue, Method};
use serde::Deserialize;
use snafu::prelude::*;
use tracing::{debug, instrument};
use url::Url;

/// Authenticates as the application itself with its client ID and secret
#[derive(Clone)]
pub struct TwoLeggedAuth {
    client_id: String,
    client_secret: String,
    base_url: Url,
    transport: Box<dyn HttpTransport>,
}

/// The parts of the token endpoint's response we care about
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl TwoLeggedAuth {
    pub fn new(
        base_url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_url,
            transport: Box::new(ReqwestTransport::new()),
        }
    }

    /// Use a custom [`HttpTransport`] for token requests instead of the default `reqwest` one
    pub fn with_transport(mut self, transport: impl HttpTransport) -> Self {
        self.transport = Box::new(transport);
        self
    }

    fn token_url(&self) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                crate::error::InvalidBaseUrlSnafu {
                    url: self.base_url.clone(),
                }
                .build()
            })?
            .pop_if_empty()
            .extend(["authentication", "v2", "token"]);

        Ok(url)
    }

    fn basic_auth_header(&self) -> HeaderValue {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, self.client_secret));

        // Base64 output is always a valid header value
        let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))
            .expect("BUG: base64 is always a valid header value");
        value.set_sensitive(true);
        value
    }
}

#[async_trait::async_trait]
impl Authenticator for TwoLeggedAuth {
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn get_token(&self, scope: &str) -> Result<String> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("scope", scope)
            .finish();

        let request = HttpRequest::new(Method::POST, self.token_url()?)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .header(header::ACCEPT, HeaderValue::from_static("application/json"))
            .header(header::AUTHORIZATION, self.basic_auth_header())
            .body(body);

        let response = self.transport.send(request).await?;

        ensure!(
            response.status.is_success(),
            crate::error::TokenRejectedSnafu {
                scope,
                status: response.status,
                body: response.body_text(),
            }
        );

        let token: TokenResponse = serde_json::from_slice(&response.body).context(
            crate::error::DecodeResponseSnafu {
                what: "access token",
            },
        )?;

        debug!(
            token_type = token.token_type.as_deref().unwrap_or("unknown"),
            expires_in = token.expires_in,
            "Obtained two-legged access token"
        );

        Ok(token.access_token)
    }

    fn host_base_path(&self) -> &Url {
        &self.base_url
    }
}

impl std::fmt::Debug for TwoLeggedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoLeggedAuth")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<...>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
