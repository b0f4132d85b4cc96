//! The pieces shared by the two calls to the storage gateway's signed upload endpoint.
use crate::auth::{Authenticator, DATA_READ_WRITE_SCOPE};
use crate::transport::{HttpRequest, HttpTransport};
use crate::Result;
use http::Method;
use std::sync::Arc;
use url::Url;

/// Everything needed to call `.../buckets/{bucketKey}/objects/{objectKey}/signeds3upload` for one
/// object.
///
/// Cheap to clone; the authenticator is shared and the transport is itself an `Arc` internally.
#[derive(Clone, Debug)]
pub(crate) struct SignedUploadEndpoint {
    bucket_key: String,
    object_key: String,
    url: Url,
    auth: Arc<dyn Authenticator>,
    transport: Box<dyn HttpTransport>,
}

impl SignedUploadEndpoint {
    pub(crate) fn new(
        auth: Arc<dyn Authenticator>,
        transport: Box<dyn HttpTransport>,
        bucket_key: impl Into<String>,
        object_key: impl Into<String>,
    ) -> Result<Self> {
        let bucket_key = bucket_key.into();
        let object_key = object_key.into();

        let base = auth.host_base_path();
        let mut url = base.clone();

        // Pushing each component as its own path segment percent-encodes anything in the keys
        // that isn't valid in a segment, `/` included
        url.path_segments_mut()
            .map_err(|_| crate::error::InvalidBaseUrlSnafu { url: base.clone() }.build())?
            .pop_if_empty()
            .extend([
                "oss",
                "v2",
                "buckets",
                bucket_key.as_str(),
                "objects",
                object_key.as_str(),
                "signeds3upload",
            ]);

        Ok(Self {
            bucket_key,
            object_key,
            url,
            auth,
            transport,
        })
    }

    pub(crate) fn bucket_key(&self) -> &str {
        &self.bucket_key
    }

    pub(crate) fn object_key(&self) -> &str {
        &self.object_key
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    /// Start building an authenticated request to this endpoint
    pub(crate) async fn request(&self, method: Method, url: Url) -> Result<HttpRequest> {
        let token = self.auth.get_token(DATA_READ_WRITE_SCOPE).await?;

        Ok(HttpRequest::new(method, url).bearer_auth(&token))
    }
}
