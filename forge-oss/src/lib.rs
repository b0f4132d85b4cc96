#![doc = include_str!("../README.md")]

mod auth;
mod chunks;
mod config;
mod error;
mod finalize;
mod gateway;
mod job;
mod plan;
mod retry;
mod signed_url;
mod transport;
mod uploader;

pub use auth::{
    default_base_url, Authenticator, StaticAccessToken, ThreeLeggedAuth, TokenRefreshCallback,
    TwoLeggedAuth, DATA_READ_WRITE_SCOPE, DEFAULT_BASE_URL,
};
pub use config::{Config, MIN_CHUNK_SIZE};
pub use error::{BoxedError, ForgeOssError, Result};
pub use finalize::UploadResult;
pub use job::{UploadJob, UploadJobBuilder, UploadProgressCallback, UploadState};
pub use plan::{Batch, ChunkPlan, MAX_PARTS_PER_REQUEST};
pub use retry::{RetryPolicy, RetryableStatus};
pub use signed_url::SignedUrlBatch;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
