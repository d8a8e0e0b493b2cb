//! Phaseflow CLI entry point.

use clap::Parser;

use phaseflow::cli::{commands, context, handle_error, Cli, Commands};
use phaseflow::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A missing or broken config must not stop `init` from running.
    let log_config = context::load_config(cli.config.as_deref())
        .map(|config| LogConfig::from(&config.logging))
        .unwrap_or_default();
    let _logger = LoggerImpl::init(&log_config).ok();

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Registry(args) => commands::registry::execute(args, config_path, cli.json),
        Commands::Flow(args) => commands::flow::execute(args, config_path, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
