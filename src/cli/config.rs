//! CLI subcommand: `editor-bridge config`
//!
//! Scalar keys are addressed by section, e.g. `bridge.request_timeout_ms`
//! or `discovery.status_dir`. Static editors live in `[[instances]]`
//! tables, which are edited in the file itself:
//!
//! ```toml
//! [[instances]]
//! id = "Game@6400"
//! name = "Game"
//! host = "127.0.0.1"
//! port = 6400
//! ```

use anyhow::Result;
use clap::{Args, Subcommand};

use super::Cli;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective settings, defaults filled in
    Show {
        /// toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Print one setting
    Get {
        /// Dotted key such as retry.max_attempts or discovery.rescan_secs
        key: String,
    },

    /// Change one setting and write the file
    Set {
        /// Dotted key such as bridge.request_timeout_ms; [[instances]] are edited in the file
        key: String,

        /// New value; lists (retry.read_only_actions) take comma-separated actions
        value: String,
    },

    /// Print where the config file is read from
    Path,

    /// Write a commented config file with every default
    Init {
        /// Replace a file that already exists
        #[arg(short, long)]
        force: bool,
    },
}

pub fn run(cli: &Cli, args: &ConfigArgs) -> Result<()> {
    match &args.command {
        ConfigCommands::Show { format } => show_config(cli, format),
        ConfigCommands::Get { key } => get_config(cli, key),
        ConfigCommands::Set { key, value } => set_config(cli, key, value),
        ConfigCommands::Path => show_path(cli),
        ConfigCommands::Init { force } => init_config(cli, *force),
    }
}

fn show_config(cli: &Cli, format: &str) -> Result<()> {
    let config = cli.load_config()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn get_config(cli: &Cli, key: &str) -> Result<()> {
    let config = cli.load_config()?;
    println!("{}", config.get_value(key)?);
    Ok(())
}

fn set_config(cli: &Cli, key: &str, value: &str) -> Result<()> {
    let mut config = cli.load_config()?;
    config.set_value(key, value)?;
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn show_path(cli: &Cli) -> Result<()> {
    let config = Config {
        source: cli.config.as_ref().map(Into::into),
        ..Config::default()
    };
    println!("{}", config.file_path().display());
    Ok(())
}

fn init_config(cli: &Cli, force: bool) -> Result<()> {
    let config = Config {
        source: cli.config.as_ref().map(Into::into),
        ..Config::default()
    };
    let path = config.file_path();

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to replace it",
            path.display()
        );
    }

    config.save_with_template()
}
