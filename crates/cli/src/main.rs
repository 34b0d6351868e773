mod config_commands;
mod replay_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    switchboard_config::SwitchboardConfig,
    switchboard_metrics::{MetricsRecorderConfig, init_metrics},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchboard", about = "Switchboard — customer chat dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/switchboard/).
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSONL event stream through the dispatch engine.
    Replay(replay_commands::ReplayArgs),
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Logs go to stderr so that stdout carries only command output.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SwitchboardConfig> {
    match cli.config {
        Some(ref path) => {
            debug!(path = %path.display(), "loading config");
            Ok(switchboard_config::load_config(path)?)
        },
        None => Ok(switchboard_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        Commands::Replay(ref args) => {
            let config = load_config(&cli)?;
            let metrics = init_metrics(MetricsRecorderConfig {
                enabled: config.metrics.enabled,
                global_labels: config
                    .metrics
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })?;
            replay_commands::handle_replay(&config, args, &metrics).await
        },
        Commands::Config { ref action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
    }
}
