//! The HTTP plumbing underneath every API call.
//!
//! All requests go through the [`HttpTransport`] trait rather than straight to `reqwest`, so that
//! the upload pipeline can be exercised against scripted responses in tests, and so that callers
//! can supply their own client (with proxies, custom TLS roots, etc) if they need to.
use crate::error::BoxedError;
use crate::Result;
use bytes::Bytes;
use dyn_clone::DynClone;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use snafu::IntoError;
use url::Url;

/// An HTTP request with a fully buffered body.
///
/// Bodies are [`Bytes`] so cloning a request to retry it doesn't copy the payload.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add an `Authorization: Bearer` header with the given token
    pub(crate) fn bearer_auth(self, token: &str) -> Self {
        // Tokens come from the auth service and are plain ASCII, but a caller-supplied token
        // could be anything
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.header(http::header::AUTHORIZATION, value)
            }
            Err(_) => {
                tracing::warn!("Access token contains characters that are not valid in an HTTP header; omitting it");
                self
            }
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// An HTTP response with a fully buffered body
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// The body as text, for inclusion in error messages.
    pub fn body_text(&self) -> String {
        if self.body.is_empty() {
            "No Body".to_string()
        } else {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }
}

/// Render a URL for log output without its query string.
///
/// Signed storage URLs carry their credentials in the query, which must never end up in logs.
pub(crate) fn loggable_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

/// Something that can send an [`HttpRequest`] and produce the [`HttpResponse`].
///
/// Implementations must return `Ok` for any response that has a status code, successful or not.
/// `Err` is reserved for requests that never got a response at all (DNS failure, connection
/// refused, TLS errors and the like).
///
/// Note that all implementations should be trivially cloneable such that the cost of a clone is
/// the cost of increasing the ref count on an `Arc`
#[async_trait::async_trait]
pub trait HttpTransport: DynClone + std::fmt::Debug + Sync + Send + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

dyn_clone::clone_trait_object!(HttpTransport);

/// Implementation of [`HttpTransport`] using `reqwest`
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        // reqwest errors embed the full request URL, query string included
        let transport_error = |e: reqwest::Error| {
            crate::error::TransportSnafu {
                method: method.clone(),
                url: loggable_url(&url),
            }
            .into_error(Box::new(e.without_url()) as BoxedError)
        };

        let response = self
            .client
            .request(method.clone(), url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
