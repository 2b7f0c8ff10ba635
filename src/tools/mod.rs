//! Agent-facing tools.
//!
//! Each tool declares its field shapes, builds a command envelope and hands
//! it to the [`Dispatcher`]. Tools never carry editor-side logic.

mod asset;
mod gameobject;
mod scene;
mod session;
mod test_runner;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::coerce::{coerce_string, value_kind};
use crate::dispatch::Dispatcher;
use crate::envelope::CommandEnvelope;
use crate::error::{BridgeError, BridgeResult};
use crate::instance::SessionContext;
use crate::response::DispatchResult;

pub use asset::ManageAssetTool;
pub use gameobject::ManageGameObjectTool;
pub use scene::ManageSceneTool;
pub use session::{DebugRequestContextTool, SetActiveInstanceTool};
pub use test_runner::RunTestsTool;

#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, ctx: &SessionContext, args: &Value) -> DispatchResult;
}

pub fn create_default_tools(dispatcher: Arc<Dispatcher>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ManageAssetTool::new(dispatcher.clone())),
        Box::new(RunTestsTool::new(dispatcher.clone())),
        Box::new(ManageSceneTool::new(dispatcher.clone())),
        Box::new(ManageGameObjectTool::new(dispatcher.clone())),
        Box::new(SetActiveInstanceTool::new(dispatcher.clone())),
        Box::new(DebugRequestContextTool::new(dispatcher)),
    ]
}

pub fn find_tool<'a>(tools: &'a [Box<dyn Tool>], name: &str) -> Option<&'a dyn Tool> {
    tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
}

/// Accept arguments as a mapping, as a JSON string holding one, or absent.
pub(crate) fn arguments(args: &Value) -> BridgeResult<Value> {
    match args {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::Object(_) => Ok(args.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => Ok(v),
            Ok(other) => Err(BridgeError::type_mismatch(
                "arguments",
                format!("must be a mapping; received {}", value_kind(&other)),
            )),
            Err(e) => Err(BridgeError::type_mismatch(
                "arguments",
                format!("invalid JSON: {}", e),
            )),
        },
        other => Err(BridgeError::type_mismatch(
            "arguments",
            format!("must be a mapping; received {}", value_kind(other)),
        )),
    }
}

/// Validate the `action` argument against the tool's allowed set.
pub(crate) fn required_action(args: &Value, allowed: &[&str]) -> BridgeResult<String> {
    let Some(action) = coerce_string(args.get("action")) else {
        return Err(BridgeError::type_mismatch(
            "action",
            format!("required; expected one of: {}", allowed.join(", ")),
        ));
    };
    let normalized = action.trim().to_lowercase();
    if allowed.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(BridgeError::type_mismatch(
            "action",
            format!(
                "unsupported action '{}'; expected one of: {}",
                action,
                allowed.join(", ")
            ),
        ))
    }
}

pub(crate) fn required_string(args: &Value, field: &str) -> BridgeResult<String> {
    coerce_string(args.get(field))
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| BridgeError::type_mismatch(field, "required"))
}

/// Send a built envelope, or report why it could not be built.
pub(crate) async fn send(
    dispatcher: &Dispatcher,
    tool: &str,
    ctx: &SessionContext,
    envelope: BridgeResult<CommandEnvelope>,
) -> DispatchResult {
    match envelope {
        Ok(envelope) => dispatcher.dispatch(ctx, &envelope).await,
        Err(e) => {
            warn!(tool, error = %e, "Rejected tool arguments");
            DispatchResult::from_error(&e)
        }
    }
}
