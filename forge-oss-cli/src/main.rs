use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use url::Url;

mod progress;

/// Upload files to Forge object storage
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Operation to perform
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    globals: Globals,

    #[clap(flatten)]
    config: forge_oss::Config,
}

/// Arguments that apply regardless of command
#[derive(Parser, Debug)]
struct Globals {
    /// Use a different API host than the production one.
    ///
    /// Both the authentication and the storage gateway calls are made to this host.
    #[clap(long, global = true, value_name = "URL", default_value = forge_oss::DEFAULT_BASE_URL)]
    base_url: Url,

    /// Enable verbose log output
    #[clap(short = 'v', long, conflicts_with = "quiet", global = true)]
    verbose: bool,

    /// Be quiet, suppress almost all output (except errors)
    #[clap(short = 'q', long, conflicts_with = "verbose", global = true)]
    quiet: bool,
}

/// How to authenticate.  Either an application's client credentials, or a user's access token.
#[derive(Parser, Debug)]
#[clap(group(ArgGroup::new("auth").required(true).args(&["client_id", "access_token"])))]
struct Credentials {
    /// The client ID of the application to authenticate as (two-legged)
    #[clap(long, env = "FORGE_CLIENT_ID", requires = "client_secret")]
    client_id: Option<String>,

    /// The client secret of the application to authenticate as
    #[clap(long, env = "FORGE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// A user access token obtained through the three-legged flow.  It must have the
    /// `data:read data:write` scopes and stay valid for the duration of the upload.
    #[clap(long, env = "FORGE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
}

impl Credentials {
    fn authenticator(self, base_url: Url) -> Arc<dyn forge_oss::Authenticator> {
        match (self.client_id, self.client_secret, self.access_token) {
            (Some(client_id), Some(client_secret), _) => Arc::new(forge_oss::TwoLeggedAuth::new(
                base_url,
                client_id,
                client_secret,
            )),
            (_, _, Some(access_token)) => Arc::new(forge_oss::ThreeLeggedAuth::new(
                base_url,
                forge_oss::StaticAccessToken::new(access_token),
            )),
            _ => unreachable!("BUG: clap requires one of the credential arguments"),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file to an object in a bucket
    Upload {
        /// The key of the bucket to upload into.  The bucket must already exist.
        #[clap(short = 'b', long)]
        bucket: String,

        /// The key of the object to create.
        ///
        /// Defaults to the name of the file being uploaded.  May contain `/` characters; they
        /// are part of the key and do not imply any directory structure.
        #[clap(short = 'k', long)]
        object_key: Option<String>,

        #[clap(flatten)]
        credentials: Credentials,

        /// The file to upload
        #[clap(value_parser, value_name = "FILE")]
        file: PathBuf,
    },
}

fn init_logging(globals: &Globals) {
    use tracing_subscriber::EnvFilter;

    let default_level = if globals.verbose {
        "debug"
    } else if globals.quiet {
        "error"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("h2=warn,hyper=info,rustls=info,{default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Completes when the user hits Ctrl-C, which aborts the job
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(err = ?e, "Unable to listen for Ctrl-C; the upload can't be aborted");

        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    init_logging(&args.globals);

    match args.command {
        Command::Upload {
            bucket,
            object_key,
            credentials,
            file,
        } => {
            let auth = credentials.authenticator(args.globals.base_url.clone());

            let mut builder = forge_oss::UploadJobBuilder::new(args.config, auth, bucket);
            if let Some(object_key) = object_key {
                builder = builder.object_key(object_key);
            }

            let job = builder.build(&file).await?;
            let result = progress::run_upload_job(&args.globals, job, ctrl_c()).await?;

            if !args.globals.quiet {
                println!("{}", result.object_id);
            }
        }
    }

    Ok(())
}
