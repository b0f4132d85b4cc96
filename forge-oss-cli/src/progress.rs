//! Progress bar rendering for uploads
use forge_oss::{Result, UploadResult, UploadState};
use std::future::Future;

/// Run the specified upload job, with a progress bar for extra pretty-ness
pub(crate) async fn run_upload_job(
    globals: &super::Globals,
    job: forge_oss::UploadJob,
    abort: impl Future<Output = ()>,
) -> Result<UploadResult> {
    let progress = UploadProgressReport::new(hide_progress(globals), &job);

    job.run(abort, progress).await
}

/// Progress should be hidden for either of verbose mode (because there will be a flurry of log
/// messages and the progress bar rendering will be all messed up), or quiet mode (because
/// progress bars are not quiet).
fn hide_progress(globals: &super::Globals) -> bool {
    globals.verbose || globals.quiet
}

/// Renders the bytes uploaded so far, with the upload's current phase as the message
struct UploadProgressReport {
    bytes_uploaded: indicatif::ProgressBar,
}

impl UploadProgressReport {
    fn new(hide_progress: bool, job: &forge_oss::UploadJob) -> Self {
        let bytes_uploaded = if !hide_progress {
            indicatif::ProgressBar::new(job.total_bytes())
        } else {
            indicatif::ProgressBar::hidden()
        };

        bytes_uploaded.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} {prefix}: {msg:<30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        bytes_uploaded.set_prefix(job.object_key().to_string());

        Self { bytes_uploaded }
    }
}

impl forge_oss::UploadProgressCallback for UploadProgressReport {
    fn upload_started(&self, total_bytes: u64, total_parts: u32) {
        self.bytes_uploaded.set_length(total_bytes);
        self.bytes_uploaded
            .set_message(format!("Starting upload in {total_parts} part(s)..."));
    }

    fn state_changed(&self, state: UploadState) {
        match state {
            UploadState::Planning => {}
            UploadState::BatchInFlight => self.bytes_uploaded.set_message("Requesting URLs"),
            UploadState::ChunkUploading => self.bytes_uploaded.set_message("Uploading parts"),
            UploadState::Finalizing => self.bytes_uploaded.set_message("Finalizing"),
            UploadState::Complete => self.bytes_uploaded.finish_with_message("Complete"),
            UploadState::Failed => self.bytes_uploaded.abandon_with_message("Failed"),
        }
    }

    fn part_uploaded(&self, _part_number: u32, bytes: u64) {
        self.bytes_uploaded.inc(bytes);
    }
}
