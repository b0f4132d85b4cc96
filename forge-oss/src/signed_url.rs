//! Requesting batches of signed part upload URLs from the storage gateway.
use crate::gateway::SignedUploadEndpoint;
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use http::{header, HeaderValue, Method};
use serde::{Deserialize, Deserializer};
use snafu::prelude::*;
use tracing::{debug, instrument};
use url::Url;

/// Signed upload URLs for a consecutive run of parts, as returned by the gateway.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlBatch {
    /// The key identifying the upload session.  Assigned by the gateway on the first request
    /// and passed back on every subsequent request for the same upload.
    pub upload_key: String,

    /// When the whole upload session expires
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub upload_expiration: Option<DateTime<Utc>>,

    /// When the URLs in this batch expire
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub url_expiration: Option<DateTime<Utc>>,

    /// One URL per part, in part number order
    pub urls: Vec<Url>,

    /// The part number of the first URL in `urls`.  Not part of the response; filled in from the
    /// request.
    #[serde(skip)]
    pub first_part: u32,
}

impl SignedUrlBatch {
    /// The signed URL for the given (1-based) part number, if it's in this batch
    pub fn url_for_part(&self, part_number: u32) -> Option<&Url> {
        part_number
            .checked_sub(self.first_part)
            .and_then(|index| self.urls.get(index as usize))
    }
}

/// The gateway has been seen to report expirations both as RFC 3339 strings and as epoch
/// milliseconds.  Anything else is treated as absent rather than failing the upload, since the
/// expirations are informational.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Option::<RawTimestamp>::deserialize(deserializer)? {
        Some(RawTimestamp::Millis(millis)) => Utc.timestamp_millis_opt(millis).single(),
        Some(RawTimestamp::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Utc)),
        Some(RawTimestamp::Other(_)) | None => None,
    })
}

/// Obtains signed URLs for batches of parts of one object
#[derive(Clone, Debug)]
pub(crate) struct SignedUrlProvider {
    endpoint: SignedUploadEndpoint,
    minutes_expiration: u32,
    retry: RetryPolicy,
}

impl SignedUrlProvider {
    pub(crate) fn new(
        endpoint: SignedUploadEndpoint,
        minutes_expiration: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            endpoint,
            minutes_expiration,
            retry,
        }
    }

    /// Request signed URLs for `part_count` parts starting at `first_part`.
    ///
    /// `upload_key` must be `None` for the first request of an upload, and the key returned by
    /// that first request for every request after it.
    #[instrument(skip(self, upload_key), fields(bucket = %self.endpoint.bucket_key(), key = %self.endpoint.object_key()))]
    pub(crate) async fn request_signed_urls(
        &self,
        first_part: u32,
        part_count: u32,
        upload_key: Option<&str>,
    ) -> Result<SignedUrlBatch> {
        let mut url = self.endpoint.url().clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("firstPart", &first_part.to_string())
                .append_pair("parts", &part_count.to_string())
                .append_pair("minutesExpiration", &self.minutes_expiration.to_string());
            if let Some(upload_key) = upload_key {
                query.append_pair("uploadKey", upload_key);
            }
        }

        let request = self
            .endpoint
            .request(Method::GET, url)
            .await?
            .header(header::ACCEPT, HeaderValue::from_static("application/json"));

        debug!(
            first_part,
            part_count,
            continuing_session = upload_key.is_some(),
            "Requesting signed upload URLs"
        );

        let last_part = first_part + part_count.saturating_sub(1);
        let outcome = self
            .retry
            .send(self.endpoint.transport(), request)
            .await
            .context(crate::error::SignedUrlTransportSnafu {
                bucket_key: self.endpoint.bucket_key(),
                object_key: self.endpoint.object_key(),
                first_part,
                last_part,
            })?;

        let response = match outcome {
            RetryOutcome::Success { response, .. } => response,
            RetryOutcome::Failed {
                status,
                body,
                attempts,
            } => {
                return crate::error::SignedUrlFetchSnafu {
                    bucket_key: self.endpoint.bucket_key(),
                    object_key: self.endpoint.object_key(),
                    first_part,
                    last_part,
                    status,
                    attempts,
                    body,
                }
                .fail()
            }
        };

        let mut batch: SignedUrlBatch =
            serde_json::from_slice(&response.body).context(crate::error::DecodeResponseSnafu {
                what: "signed upload URLs",
            })?;

        ensure!(
            batch.urls.len() == part_count as usize,
            crate::error::SignedUrlCountMismatchSnafu {
                first_part,
                expected: part_count,
                actual: batch.urls.len(),
            }
        );

        batch.first_part = first_part;

        debug!(
            urls = batch.urls.len(),
            url_expiration = ?batch.url_expiration,
            "Received signed upload URLs"
        );

        Ok(batch)
    }
}
