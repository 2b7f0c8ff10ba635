use std::path::Path;

use anyhow::Result;
use clap::Parser;

use editor_bridge::cli::{self, Cli, Commands};
use editor_bridge::config::{Config, LoggingConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Read-only: `config init` must still find no file on a fresh install.
    let logging = Config::logging_settings(cli.config.as_deref().map(Path::new));
    init_logging(&logging, cli.verbose);

    match &cli.command {
        Commands::Call(args) => cli::call::run(&cli, args).await,
        Commands::Serve => cli::serve::run(&cli).await,
        Commands::Instances(args) => cli::instances::run(&cli, args).await,
        Commands::Tools => cli::tools::run(),
        Commands::Config(args) => cli::config::run(&cli, args),
        Commands::Paths => cli::paths::run(&cli),
    }
}

/// Logs go to stderr; stdout carries tool results only.
fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
