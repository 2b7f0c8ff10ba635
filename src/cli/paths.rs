//! CLI subcommand: `editor-bridge paths`
//!
//! Prints all resolved paths for debugging and scripting.

use anyhow::Result;

use super::Cli;
use crate::paths::Paths;

pub fn run(cli: &Cli) -> Result<()> {
    let paths = Paths::resolve()?;

    println!("editor-bridge Paths (XDG Base Directory)");
    println!("=========================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    if let Some(ref explicit) = cli.config {
        println!("  in use:         {}", explicit);
    }
    println!();
    match cli.load_config() {
        Ok(config) => {
            println!("Status dir: {}", config.status_dir().display());
            println!("  rescan every:   {}s", config.rescan_interval().as_secs());
        }
        Err(e) => println!("Status dir: (config error: {:#})", e),
    }

    Ok(())
}
