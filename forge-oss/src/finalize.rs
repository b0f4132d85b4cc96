//! Completing an upload once all of its parts are in storage.
use crate::gateway::SignedUploadEndpoint;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::Result;
use http::{header, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tracing::{debug, instrument};

/// The object metadata header telling storage what the assembled object's content type is
const META_CONTENT_TYPE: HeaderName = HeaderName::from_static("x-ads-meta-content-type");

/// The object created by a successful upload
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub bucket_key: String,

    /// The URN-style identifier of the object, used to refer to it from other APIs
    pub object_id: String,

    pub object_key: String,

    /// Size of the object in bytes, as recorded by storage
    pub size: u64,

    /// Some gateway versions spell this `content-type`
    #[serde(default, alias = "content-type")]
    pub content_type: Option<String>,

    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteUploadRequest<'a> {
    upload_key: &'a str,
    size: u64,
}

/// Tells the gateway that every part of an upload is in place
#[derive(Clone, Debug)]
pub(crate) struct UploadFinalizer {
    endpoint: SignedUploadEndpoint,
    retry: RetryPolicy,
}

impl UploadFinalizer {
    pub(crate) fn new(endpoint: SignedUploadEndpoint, retry: RetryPolicy) -> Self {
        Self { endpoint, retry }
    }

    /// Complete the upload session `upload_key`, declaring the object's total size.
    ///
    /// If `expected_size` doesn't match what storage actually received, the gateway rejects the
    /// request and that is reported like any other failed finalize.
    #[instrument(skip(self, upload_key), fields(bucket = %self.endpoint.bucket_key(), key = %self.endpoint.object_key()))]
    pub(crate) async fn complete_upload(
        &self,
        upload_key: &str,
        expected_size: u64,
    ) -> Result<UploadResult> {
        let body = serde_json::to_vec(&CompleteUploadRequest {
            upload_key,
            size: expected_size,
        })
        .context(crate::error::EncodeRequestSnafu {
            what: "complete upload",
        })?;

        let request = self
            .endpoint
            .request(Method::POST, self.endpoint.url().clone())
            .await?
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .header(
                META_CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
            .body(body);

        let outcome = self
            .retry
            .send(self.endpoint.transport(), request)
            .await
            .context(crate::error::FinalizeTransportSnafu {
                bucket_key: self.endpoint.bucket_key(),
                object_key: self.endpoint.object_key(),
            })?;

        let response = match outcome {
            RetryOutcome::Success { response, .. } => response,
            RetryOutcome::Failed {
                status,
                body,
                attempts,
            } => {
                return crate::error::FinalizeSnafu {
                    bucket_key: self.endpoint.bucket_key(),
                    object_key: self.endpoint.object_key(),
                    status,
                    attempts,
                    body,
                }
                .fail()
            }
        };

        let result: UploadResult =
            serde_json::from_slice(&response.body).context(crate::error::DecodeResponseSnafu {
                what: "complete upload",
            })?;

        debug!(object_id = %result.object_id, size = result.size, "Upload finalized");

        Ok(result)
    }
}
