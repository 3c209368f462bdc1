mod session_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::Parser,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "docket", about = "Docket: document-backed session store")]
struct Cli {
    #[command(subcommand)]
    command: session_commands::SessionAction,

    /// Config file to load instead of discovering docket.{toml,yaml,yml,json}.
    #[arg(long, global = true, env = "DOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = match &cli.config {
        Some(path) => docket_config::load_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => docket_config::discover_and_load(),
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.store.backend,
        "docket starting"
    );

    session_commands::handle_sessions(cli.command, &config).await
}
