mod cmd;

use clap::{Parser, Subcommand};

use cmd::convert::ConvertArgs;

#[derive(Parser)]
#[command(name = "replay", about = "Event-driven replay engine")]
struct Cli {
    /// Path to TOML or HCL configuration file.
    #[arg(long, global = true, default_value = "replay.toml", env = "REPLAY_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay every configured source through the configured subscribers.
    Run,
    /// Convert a record file between JSON lines and framed binary.
    Convert(ConvertArgs),
    /// Print the arrow column layout of every configured type as JSON.
    Schema,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(config = %cli.config, "loading configuration");
    let config = match cmd::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run => cmd::run::run(&config).await,
        Command::Convert(args) => cmd::convert::run(&config, &args),
        Command::Schema => cmd::schema::run(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
