use http::{Method, StatusCode};
use snafu::prelude::*;
use std::path::PathBuf;
use url::Url;

pub type Result<T, E = ForgeOssError> = std::result::Result<T, E>;

/// Boxed error type used for failures that originate outside this crate, such as a custom
/// [`crate::HttpTransport`] or a caller-supplied token callback.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ForgeOssError {
    #[snafu(display("Invalid configuration: {message}"))]
    InvalidConfig { message: String },

    #[snafu(display(
        "A file of {file_size} bytes split into {chunk_size}-byte chunks needs more parts than the upload API supports"
    ))]
    TooManyParts { file_size: u64, chunk_size: u64 },

    #[snafu(display("The base URL '{url}' can't be used to construct API endpoint URLs"))]
    InvalidBaseUrl { url: Url },

    #[snafu(display("Error opening source file '{}'", path.display()))]
    OpenSourceFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Error reading metadata of source file '{}'", path.display()))]
    SourceFileMetadata {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("The source path '{}' has no file name to use as an object key", path.display()))]
    MissingObjectKey { path: PathBuf },

    #[snafu(display("Error reading part {part_number} from source file '{}'", path.display()))]
    ReadSourceFile {
        path: PathBuf,
        part_number: u32,
        source: std::io::Error,
    },

    #[snafu(display(
        "Source file '{}' changed while it was being uploaded: part {part_number} should be {expected} bytes but {actual} bytes were read",
        path.display()
    ))]
    SourceFileChanged {
        path: PathBuf,
        part_number: u32,
        expected: u64,
        actual: u64,
    },

    #[snafu(display("Error obtaining an access token for scope '{scope}'"))]
    Token { scope: String, source: BoxedError },

    #[snafu(display(
        "The authentication service rejected the token request for scope '{scope}' with HTTP status {status}: {body}"
    ))]
    TokenRejected {
        scope: String,
        status: StatusCode,
        body: String,
    },

    /// The request never got a response.  `url` has its query string removed, since signed URLs
    /// carry their credentials there.
    #[snafu(display("HTTP request {method} {url} failed"))]
    Transport {
        method: Method,
        url: String,
        source: BoxedError,
    },

    #[snafu(display(
        "Error requesting signed upload URLs for parts {first_part}-{last_part} of object '{object_key}' in bucket '{bucket_key}'"
    ))]
    SignedUrlTransport {
        bucket_key: String,
        object_key: String,
        first_part: u32,
        last_part: u32,
        #[snafu(source(from(ForgeOssError, Box::new)))]
        source: Box<ForgeOssError>,
    },

    #[snafu(display(
        "Error requesting signed upload URLs for parts {first_part}-{last_part} of object '{object_key}' in bucket '{bucket_key}'; last HTTP status {status} after {attempts} attempt(s): {body}"
    ))]
    SignedUrlFetch {
        bucket_key: String,
        object_key: String,
        first_part: u32,
        last_part: u32,
        status: StatusCode,
        attempts: u32,
        body: String,
    },

    #[snafu(display(
        "Signed upload URL response for parts starting at {first_part} contained {actual} URLs but {expected} were requested"
    ))]
    SignedUrlCountMismatch {
        first_part: u32,
        expected: u32,
        actual: usize,
    },

    #[snafu(display(
        "Error uploading part {part_number}; last HTTP status {status} after {attempts} attempt(s): {body}"
    ))]
    ChunkUpload {
        part_number: u32,
        status: StatusCode,
        attempts: u32,
        body: String,
    },

    #[snafu(display("Error uploading part {part_number}"))]
    ChunkUploadTransport {
        part_number: u32,
        #[snafu(source(from(ForgeOssError, Box::new)))]
        source: Box<ForgeOssError>,
    },

    #[snafu(display(
        "Error finalizing upload of object '{object_key}' in bucket '{bucket_key}'; last HTTP status {status} after {attempts} attempt(s): {body}"
    ))]
    Finalize {
        bucket_key: String,
        object_key: String,
        status: StatusCode,
        attempts: u32,
        body: String,
    },

    #[snafu(display("Error finalizing upload of object '{object_key}' in bucket '{bucket_key}'"))]
    FinalizeTransport {
        bucket_key: String,
        object_key: String,
        #[snafu(source(from(ForgeOssError, Box::new)))]
        source: Box<ForgeOssError>,
    },

    #[snafu(display("Error decoding the {what} response body"))]
    DecodeResponse {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("Error encoding the {what} request body"))]
    EncodeRequest {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("The upload of object '{object_key}' to bucket '{bucket_key}' was aborted"))]
    Aborted {
        bucket_key: String,
        object_key: String,
    },
}

impl ForgeOssError {
    /// The HTTP status code of the last response observed before this error, if the error was
    /// caused by an unsuccessful HTTP response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::TokenRejected { status, .. }
            | Self::SignedUrlFetch { status, .. }
            | Self::ChunkUpload { status, .. }
            | Self::Finalize { status, .. } => Some(*status),
            _ => None,
        }
    }
}
