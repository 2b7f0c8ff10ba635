//! CLI subcommand: `editor-bridge call <tool>`

use anyhow::Result;
use clap::Args;
use serde_json::Value;

use super::Cli;
use crate::tools::{create_default_tools, find_tool};

#[derive(Args)]
pub struct CallArgs {
    /// Tool name (see `editor-bridge tools`)
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,
}

pub async fn run(cli: &Cli, args: &CallArgs) -> Result<()> {
    let config = cli.load_config()?;
    let (dispatcher, _) = super::connect(&config).await?;
    let tools = create_default_tools(dispatcher);

    let Some(tool) = find_tool(&tools, &args.tool) else {
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        anyhow::bail!("Unknown tool '{}'. Available: {}", args.tool, names.join(", "));
    };

    // Tools accept a JSON string too, so invalid JSON is reported by the tool itself.
    let arguments = serde_json::from_str::<Value>(&args.args).unwrap_or_else(|_| Value::String(args.args.clone()));

    let result = tool.execute(&cli.session_context(), &arguments).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        anyhow::bail!("{} failed", args.tool);
    }
    Ok(())
}
