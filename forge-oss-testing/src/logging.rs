//! Per-test log capture.
//!
//! Tests run in parallel, so a process-wide subscriber would interleave the log output of every
//! test running at the same time.  Instead each test gets its own dispatcher, which is installed on
//! every thread of a runtime dedicated to that test.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// Log filter used when `RUST_LOG` isn't set.  The HTTP stack is very chatty at `debug`.
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,hyper_util=info,reqwest=info,rustls=info,tower=info,axum=info,debug";

/// A `MakeWriter` that buffers all log output of one test in memory
#[derive(Clone, Default)]
struct CapturedLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLog {
    /// Empty the buffer, returning what was in it.
    fn drain(&self) -> String {
        let buffer = std::mem::take(&mut *self.buffer.lock().unwrap());

        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl<'a> Write for &'a CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLog {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn test_dispatch(log: CapturedLog) -> tracing::Dispatch {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let format = fmt::layer()
        .with_level(true)
        // filters operate on targets, so it helps to see them
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(false)
        .with_writer(log);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .unwrap();

    tracing::Dispatch::new(tracing_subscriber::registry().with(filter).with(format))
}

/// Run an async test with its own runtime and its own log capture.
///
/// Use this in place of `#[tokio::test]`.  Every worker thread of the runtime, and thus every
/// task the test spawns (including the [`crate::fake_gateway::FakeGateway`] server), logs to the
/// same buffer.  The buffer is printed when the test finishes, whether it passed, failed, or
/// panicked, so `cargo test` shows it only for failing tests.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    let log = CapturedLog::default();
    let dispatch = Arc::new(test_dispatch(log.clone()));

    tracing::dispatcher::with_default(&dispatch, || {
        std::thread_local! {
            static THREAD_DISPATCHER_GUARD: RefCell<Option<tracing::subscriber::DefaultGuard>> = const { RefCell::new(None) };
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        {
            let dispatch = dispatch.clone();
            builder.on_thread_start(move || {
                THREAD_DISPATCHER_GUARD.with(|cell| {
                    cell.replace(Some(tracing::dispatcher::set_default(&dispatch)));
                })
            });
        }
        builder.on_thread_stop(|| {
            THREAD_DISPATCHER_GUARD.with(|cell| cell.replace(None));
        });

        let runtime = builder.build()?;

        // Test futures can't reasonably be required to be unwind safe
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        println!("Log events from this test: \n{}", log.drain());

        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
