//! CLI subcommand: `editor-bridge instances`

use anyhow::Result;
use clap::Args;

use super::Cli;
use crate::instance::InstanceSummary;

#[derive(Args)]
pub struct InstancesArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(cli: &Cli, args: &InstancesArgs) -> Result<()> {
    let config = cli.load_config()?;
    let (dispatcher, _) = super::connect(&config).await?;
    let summaries: Vec<InstanceSummary> = dispatcher
        .registry()
        .list()
        .await
        .iter()
        .map(|e| e.summary())
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("No instances found.");
        println!("Status directory: {}", config.status_dir().display());
        return Ok(());
    }

    println!("{:<28} {:<22} {:<6} NAME", "ID", "ADDRESS", "STATUS");
    for s in &summaries {
        let status = match s.status {
            crate::instance::InstanceStatus::Alive => "alive",
            crate::instance::InstanceStatus::Down => "down",
        };
        println!(
            "{:<28} {:<22} {:<6} {}",
            s.id,
            s.address,
            status,
            s.name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
