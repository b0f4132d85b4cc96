//! Uploading one part's bytes to its signed storage URL.
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::transport::{loggable_url, HttpRequest, HttpTransport};
use crate::Result;
use bytes::Bytes;
use http::{header, HeaderValue, Method, StatusCode};
use snafu::prelude::*;
use tracing::{debug, instrument};
use url::Url;

/// PUTs chunks to signed URLs.
///
/// The signed URL is its own authorization, so no bearer token is sent.  An expired URL is
/// reported by storage as `403 Forbidden`, which is never retried here; obtaining a fresh URL is
/// the caller's job.
#[derive(Clone, Debug)]
pub(crate) struct ChunkUploader {
    transport: Box<dyn HttpTransport>,
    retry: RetryPolicy,
}

impl ChunkUploader {
    pub(crate) fn new(transport: Box<dyn HttpTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    /// Upload `data` as part `part_number` to `url`, returning the successful status code
    #[instrument(skip(self, url, data), fields(url = %loggable_url(url), len = data.len()))]
    pub(crate) async fn upload_chunk(
        &self,
        url: &Url,
        part_number: u32,
        data: Bytes,
    ) -> Result<StatusCode> {
        let request = HttpRequest::new(Method::PUT, url.clone())
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
            .header(header::CONTENT_LENGTH, HeaderValue::from(data.len()))
            .body(data);

        let outcome = self
            .retry
            .send(self.transport.as_ref(), request)
            .await
            .context(crate::error::ChunkUploadTransportSnafu { part_number })?;

        match outcome {
            RetryOutcome::Success { response, attempts } => {
                debug!(status = %response.status, attempts, "Uploaded part");

                Ok(response.status)
            }
            RetryOutcome::Failed {
                status,
                body,
                attempts,
            } => crate::error::ChunkUploadSnafu {
                part_number,
                status,
                attempts,
                body,
            }
            .fail(),
        }
    }
}
