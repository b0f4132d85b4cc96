//! The upload job, which drives one file through planning, batches of signed URLs, part uploads
//! and finalization.
use crate::auth::Authenticator;
use crate::chunks::{Chunk, ChunkReader};
use crate::finalize::{UploadFinalizer, UploadResult};
use crate::gateway::SignedUploadEndpoint;
use crate::plan::{Batch, ChunkPlan};
use crate::signed_url::{SignedUrlBatch, SignedUrlProvider};
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::uploader::ChunkUploader;
use crate::{Config, ForgeOssError, Result};
use http::StatusCode;
use snafu::prelude::*;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// The phases an upload moves through.
///
/// An upload goes `Planning`, then alternates between `BatchInFlight` and `ChunkUploading` once
/// per batch, then `Finalizing` and finally `Complete`.  It can become `Failed` from any state but
/// `Complete`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UploadState {
    Planning,
    BatchInFlight,
    ChunkUploading,
    Finalizing,
    Complete,
    Failed,
}

/// A trait which callers can implement to get detailed progress updates as an upload is
/// progressing.
#[allow(unused_variables)]
pub trait UploadProgressCallback: Sync + Send {
    /// The upload is starting; this many bytes will be sent in this many parts
    fn upload_started(&self, total_bytes: u64, total_parts: u32) {}

    /// The upload moved into a new phase
    fn state_changed(&self, state: UploadState) {}

    /// Signed URLs were obtained for a batch of parts, and those parts are about to be uploaded
    fn batch_acquired(&self, batch_index: u32, first_part: u32, part_count: u32) {}

    /// One part was uploaded successfully
    fn part_uploaded(&self, part_number: u32, bytes: u64) {}

    /// The upload was finalized and the object now exists
    fn upload_completed(&self, result: &UploadResult) {}
}

/// Builds an [`UploadJob`] for one local file.
#[derive(Debug)]
pub struct UploadJobBuilder {
    config: Config,
    auth: Arc<dyn Authenticator>,
    transport: Box<dyn HttpTransport>,
    bucket_key: String,
    object_key: Option<String>,
}

impl UploadJobBuilder {
    /// Start building an upload into the bucket `bucket_key`, authenticating with `auth`.
    ///
    /// The API host that is called is the one `auth` reports with
    /// [`Authenticator::host_base_path`].
    pub fn new(config: Config, auth: Arc<dyn Authenticator>, bucket_key: impl Into<String>) -> Self {
        Self {
            config,
            auth,
            transport: Box::new(ReqwestTransport::new()),
            bucket_key: bucket_key.into(),
            object_key: None,
        }
    }

    /// Name the uploaded object `object_key`.  If not set, the file name of the source file is
    /// used.
    pub fn object_key(mut self, object_key: impl Into<String>) -> Self {
        self.object_key = Some(object_key.into());
        self
    }

    /// Use a custom [`HttpTransport`] for all of the upload's requests
    pub fn transport(mut self, transport: impl HttpTransport) -> Self {
        self.transport = Box::new(transport);
        self
    }

    /// Open the file at `path` and plan its upload.
    ///
    /// Nothing is sent over the network until [`UploadJob::run`] is called.
    pub async fn build(self, path: impl AsRef<Path>) -> Result<UploadJob> {
        self.config.validate()?;

        let path = path.as_ref().to_path_buf();

        let object_key = match self.object_key {
            Some(object_key) => object_key,
            None => path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.to_string())
                .with_context(|| crate::error::MissingObjectKeySnafu { path: path.clone() })?,
        };

        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|_| crate::error::OpenSourceFileSnafu { path: path.clone() })?;
        let metadata = file
            .metadata()
            .await
            .with_context(|_| crate::error::SourceFileMetadataSnafu { path: path.clone() })?;

        let plan = ChunkPlan::new(metadata.len(), self.config.chunk_size_bytes())?;

        debug!(
            path = %path.display(),
            bucket = %self.bucket_key,
            key = %object_key,
            file_size = plan.file_size(),
            total_parts = plan.total_parts(),
            total_batches = plan.total_batches(),
            "Planned upload"
        );

        let endpoint = SignedUploadEndpoint::new(
            self.auth,
            self.transport.clone(),
            self.bucket_key,
            object_key,
        )?;

        Ok(UploadJob {
            path,
            file,
            plan,
            provider: SignedUrlProvider::new(
                endpoint.clone(),
                self.config.minutes_expiration,
                self.config.gateway_retry.clone(),
            ),
            uploader: ChunkUploader::new(self.transport, self.config.part_upload_retry.clone()),
            finalizer: UploadFinalizer::new(endpoint.clone(), self.config.gateway_retry),
            endpoint,
        })
    }
}

/// A job which uploads one local file to one object using signed multi-part upload.
#[derive(Debug)]
pub struct UploadJob {
    path: PathBuf,
    file: tokio::fs::File,
    plan: ChunkPlan,
    endpoint: SignedUploadEndpoint,
    provider: SignedUrlProvider,
    uploader: ChunkUploader,
    finalizer: UploadFinalizer,
}

impl UploadJob {
    /// How the file will be split into parts and batches
    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// The total number of bytes that will be uploaded
    pub fn total_bytes(&self) -> u64 {
        self.plan.file_size()
    }

    /// The total number of parts the file is uploaded in
    pub fn total_parts(&self) -> u32 {
        self.plan.total_parts()
    }

    pub fn bucket_key(&self) -> &str {
        self.endpoint.bucket_key()
    }

    pub fn object_key(&self) -> &str {
        self.endpoint.object_key()
    }

    /// Alternative to [`Self::run`] which doesn't require a [`UploadProgressCallback`]
    /// implementation, for callers that do not care about progress information.
    pub async fn run_without_progress(
        self,
        abort: impl Future<Output = ()>,
    ) -> Result<UploadResult> {
        // A dummy impl of UploadProgressCallback that doesn't do anything with any of the progress
        // updates
        struct NoProgress {}
        impl UploadProgressCallback for NoProgress {}

        self.run(abort, NoProgress {}).await
    }

    /// Run the job, returning only when the upload has been finalized (or failed).
    ///
    /// If the `abort` future is completed, it's a signal that the job should be aborted.  The
    /// request in flight (or retry wait in progress) is abandoned and this method returns an
    /// [`ForgeOssError::Aborted`] error.  Parts already uploaded are left for storage to expire
    /// along with the rest of the unfinished session.
    #[instrument(skip_all, fields(bucket = %self.bucket_key(), key = %self.object_key(), total_parts = self.total_parts()))]
    pub async fn run<Abort, Progress>(self, abort: Abort, progress: Progress) -> Result<UploadResult>
    where
        Abort: Future<Output = ()>,
        Progress: UploadProgressCallback + 'static,
    {
        let bucket_key = self.bucket_key().to_string();
        let object_key = self.object_key().to_string();

        let result = tokio::select! {
            // Checked first so that an abort which is already complete wins even if the upload
            // could also make progress
            biased;

            () = abort => crate::error::AbortedSnafu {
                bucket_key,
                object_key,
            }
            .fail(),
            result = self.upload(&progress) => result,
        };

        match &result {
            Ok(upload_result) => {
                info!(object_id = %upload_result.object_id, size = upload_result.size, "Upload complete");
                set_state(&progress, UploadState::Complete);
                progress.upload_completed(upload_result);
            }
            Err(e) => {
                error!(err = ?e, "Upload failed");
                set_state(&progress, UploadState::Failed);
            }
        }

        result
    }

    async fn upload(self, progress: &dyn UploadProgressCallback) -> Result<UploadResult> {
        set_state(progress, UploadState::Planning);
        progress.upload_started(self.plan.file_size(), self.plan.total_parts());

        let chunk_size = usize::try_from(self.plan.chunk_size())
            .expect("BUG: chunk size is checked against usize when the config is validated");
        let mut reader = ChunkReader::new(self.file, chunk_size);

        // Assigned by the gateway in response to the first signed URL request
        let mut upload_key: Option<String> = None;

        for batch in self.plan.batches() {
            set_state(progress, UploadState::BatchInFlight);

            let urls = self
                .provider
                .request_signed_urls(batch.first_part, batch.part_count, upload_key.as_deref())
                .await?;

            let session_key = upload_key.get_or_insert_with(|| urls.upload_key.clone());
            if *session_key != urls.upload_key {
                // Parts are tied to the session they were uploaded in, so switching keys
                // mid-upload would orphan everything uploaded so far
                warn!(
                    batch = batch.index,
                    expected = %session_key,
                    actual = %urls.upload_key,
                    "Gateway returned a different upload key for a later batch; ignoring it"
                );
            }

            debug!(
                batch = batch.index,
                first_part = batch.first_part,
                part_count = batch.part_count,
                "Acquired signed URLs for batch"
            );
            progress.batch_acquired(batch.index, batch.first_part, batch.part_count);
            set_state(progress, UploadState::ChunkUploading);

            let mut urls = urls;
            for part_number in batch.parts() {
                let chunk = reader.next_chunk().await.with_context(|_| {
                    crate::error::ReadSourceFileSnafu {
                        path: self.path.clone(),
                        part_number,
                    }
                })?;

                let expected = self.plan.part_len(part_number);
                let actual = chunk.data.len() as u64;
                ensure!(
                    actual == expected,
                    crate::error::SourceFileChangedSnafu {
                        path: self.path.clone(),
                        part_number,
                        expected,
                        actual,
                    }
                );

                urls = upload_part(
                    &self.provider,
                    &self.uploader,
                    &batch,
                    session_key,
                    urls,
                    chunk,
                )
                .await?;

                progress.part_uploaded(part_number, actual);
            }
        }

        // The file must not have grown since it was planned, or the declared size would be short
        // of what's actually in the file
        let last_part = self.plan.total_parts();
        let trailing = reader.trailing_bytes().await.with_context(|_| {
            crate::error::ReadSourceFileSnafu {
                path: self.path.clone(),
                part_number: last_part,
            }
        })?;
        ensure!(
            trailing == 0,
            crate::error::SourceFileChangedSnafu {
                path: self.path.clone(),
                part_number: last_part,
                expected: self.plan.part_len(last_part),
                actual: self.plan.part_len(last_part) + trailing,
            }
        );

        let upload_key =
            upload_key.expect("BUG: every plan has at least one batch, which sets the upload key");

        set_state(progress, UploadState::Finalizing);
        self.finalizer
            .complete_upload(&upload_key, self.plan.file_size())
            .await
    }
}

/// Upload one chunk using the signed URL for its part in `urls`.
///
/// A `403` from storage means the signed URL has expired.  In that case fresh URLs are
/// requested for the rest of the batch and the chunk is tried once more; a second `403` is
/// fatal.  Returns the URLs to use for the rest of the batch.
async fn upload_part(
    provider: &SignedUrlProvider,
    uploader: &ChunkUploader,
    batch: &Batch,
    upload_key: &str,
    urls: SignedUrlBatch,
    chunk: Chunk,
) -> Result<SignedUrlBatch> {
    let Chunk { part_number, data } = chunk;

    let url = urls
        .url_for_part(part_number)
        .expect("BUG: signed URL batches always cover the parts they were requested for");

    let result = uploader.upload_chunk(url, part_number, data.clone()).await;
    match result {
        Ok(_) => Ok(urls),
        Err(e) if is_forbidden(&e) => {
            let remaining = batch.last_part() - part_number + 1;
            warn!(
                part_number,
                remaining, "Signed URL was rejected; requesting fresh URLs for the rest of the batch"
            );

            let urls = provider
                .request_signed_urls(part_number, remaining, Some(upload_key))
                .await?;

            let url = urls
                .url_for_part(part_number)
                .expect("BUG: signed URL batches always cover the parts they were requested for");
            uploader.upload_chunk(url, part_number, data).await?;

            Ok(urls)
        }
        Err(e) => Err(e),
    }
}

fn is_forbidden(e: &ForgeOssError) -> bool {
    matches!(e, ForgeOssError::ChunkUpload { .. }) && e.status() == Some(StatusCode::FORBIDDEN)
}

fn set_state(progress: &dyn UploadProgressCallback, state: UploadState) {
    debug!(?state, "Upload state changed");
    progress.state_changed(state);
}
