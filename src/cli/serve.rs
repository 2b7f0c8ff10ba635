//! CLI subcommand: `editor-bridge serve`
//!
//! Reads one tool call per stdin line:
//!
//! ```json
//! {"tool": "manage_scene", "arguments": {"action": "get_active"}, "session": "s1"}
//! ```
//!
//! and writes `{"line": n, "result": {...}}` per call to stdout. Calls run
//! concurrently, so results may come back out of order; `line` ties each
//! one to its request.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};
use uuid::Uuid;

use super::Cli;
use crate::error::BridgeError;
use crate::instance::SessionContext;
use crate::response::DispatchResult;
use crate::tools::{Tool, create_default_tools, find_tool};

#[derive(Debug, Deserialize)]
struct ServeRequest {
    tool: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    session: Option<String>,
    #[serde(default)]
    instance: Option<String>,
}

pub async fn run(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let (dispatcher, monitor) = super::connect(&config).await?;
    let interval = config.rescan_interval();
    let monitor_task = tokio::spawn(async move { monitor.run(interval).await });
    let tools: Arc<Vec<Box<dyn Tool>>> = Arc::new(create_default_tools(dispatcher));

    // Calls without a session share one for the lifetime of this process.
    let default_session = cli
        .session
        .clone()
        .unwrap_or_else(|| format!("serve-{}", Uuid::new_v4()));
    info!(session = %default_session, "Serving tool calls on stdin");

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let mut calls = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let tools = tools.clone();
        let out_tx = out_tx.clone();
        let base = SessionContext {
            session_id: Some(default_session.clone()),
            instance: cli.instance.clone(),
        };
        calls.spawn(async move {
            let result = handle_line(&tools, base, &line).await;
            let mut out = json!({"line": line_no, "result": result}).to_string();
            out.push('\n');
            let _ = out_tx.send(out);
        });
    }

    debug!(lines = line_no, "stdin closed, waiting for in-flight calls");
    while calls.join_next().await.is_some() {}
    monitor_task.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

async fn handle_line(tools: &[Box<dyn Tool>], base: SessionContext, line: &str) -> DispatchResult {
    let request: ServeRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return DispatchResult::from_error(&BridgeError::type_mismatch(
                "request",
                format!("expected {{\"tool\", \"arguments\"}}: {}", e),
            ));
        }
    };

    let Some(tool) = find_tool(tools, &request.tool) else {
        return DispatchResult::from_error(&BridgeError::type_mismatch(
            "tool",
            format!("unknown tool '{}'", request.tool),
        ));
    };

    let ctx = SessionContext {
        session_id: request.session.or(base.session_id),
        instance: request.instance.or(base.instance),
    };
    tool.execute(&ctx, &request.arguments).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{capturing_dispatcher, last_params};

    #[tokio::test]
    async fn line_is_routed_to_tool() {
        let (dispatcher, captured) = capturing_dispatcher().await;
        let tools = create_default_tools(dispatcher);

        let result = handle_line(
            &tools,
            SessionContext::new().with_session("base"),
            r#"{"tool": "manage_scene", "arguments": {"action": "get_active"}}"#,
        )
        .await;
        assert!(result.success);
        assert_eq!(last_params(&captured), json!({"action": "get_active"}));
    }

    #[tokio::test]
    async fn malformed_lines_fail_without_sending() {
        let (dispatcher, captured) = capturing_dispatcher().await;
        let tools = create_default_tools(dispatcher);

        let result = handle_line(&tools, SessionContext::new(), "not json").await;
        assert!(!result.success);
        assert!(result.message.unwrap().starts_with("request:"));

        let result = handle_line(&tools, SessionContext::new(), r#"{"tool": "launch_rockets"}"#).await;
        assert!(result.message.unwrap().contains("launch_rockets"));
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn per_line_session_overrides_default() {
        let (dispatcher, _) = capturing_dispatcher().await;
        let registry = dispatcher.registry().clone();
        let tools = create_default_tools(dispatcher);

        let result = handle_line(
            &tools,
            SessionContext::new().with_session("base"),
            r#"{"tool": "set_active_instance", "arguments": {"instance": "Game"}, "session": "other"}"#,
        )
        .await;
        assert!(result.success);
        assert_eq!(registry.pinned("other").await.as_deref(), Some("Game@6400"));
        assert_eq!(registry.pinned("base").await, None);
    }
}
