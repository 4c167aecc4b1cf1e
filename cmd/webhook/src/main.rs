use podenv_admission::telemetry;
use podenv_admission::{AdmissionWebhookHandler, EnvVarPolicy, JsonPodDecoder};

use std::path::PathBuf;

use clap::{Parser, ValueEnum, crate_authors, crate_description, crate_version};

mod runtime;
mod server;
mod tls;

use tls::TlsPaths;

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    /// Serve invocations from the AWS Lambda runtime API
    #[default]
    Lambda,
    /// Serve admission reviews over HTTP(S)
    Serve,
}

#[derive(Parser, Debug)]
#[command(
    name = "podenv-webhook",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// How admission requests reach the webhook
    #[arg(long, value_enum, default_value_t = Mode::Lambda, env = "WEBHOOK_MODE")]
    mode: Mode,

    /// Lambda runtime API address (host:port), required in lambda mode
    #[arg(long, env = "AWS_LAMBDA_RUNTIME_API")]
    runtime_api: Option<String>,

    /// Listen address (use "::" for IPv6, "0.0.0.0" for IPv4)
    #[arg(long, default_value = "0.0.0.0", env)]
    listen_address: String,

    /// Listen on given port
    #[arg(short, long, default_value_t = 8443, env)]
    port: u16,

    /// Path to TLS certificate file. Without it the server speaks plain HTTP
    #[arg(long, env, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key file
    #[arg(long, env, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Highest number of environment variables a container may declare
    #[arg(long, default_value_t = podenv_admission::policy::DEFAULT_MAX_ENV_VARS, env)]
    max_env_vars: usize,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,podenv_admission=debug"
    #[arg(short, long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    ///
    /// Specifies the ratio of traces to sample. A value of `1.0` will sample all traces,
    /// while a lower value will sample fewer traces. The default is `0.1`, meaning 10%
    /// of traces are sampled.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

impl Args {
    fn tls_paths(&self) -> Option<TlsPaths> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let policy = EnvVarPolicy::new(args.max_env_vars);
    tracing::info!(
        max_env_vars = policy.max_env_vars,
        mode = ?args.mode,
        "Starting podenv webhook"
    );
    let handler = AdmissionWebhookHandler::new(JsonPodDecoder, policy);

    match args.mode {
        Mode::Lambda => {
            let runtime_api = args.runtime_api.as_deref().ok_or_else(|| {
                anyhow::anyhow!("--runtime-api or AWS_LAMBDA_RUNTIME_API is required in lambda mode")
            })?;
            runtime::run(runtime_api, handler).await
        }
        Mode::Serve => {
            server::run(handler, &args.listen_address, args.port, args.tls_paths()).await
        }
    }
}
