//! Local tools: session pinning and request diagnostics. Neither one
//! talks to an instance.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use super::{Tool, ToolSchema, arguments, required_string};
use crate::dispatch::Dispatcher;
use crate::error::BridgeError;
use crate::instance::{self, SessionContext};
use crate::response::{DispatchResult, Route};

pub struct SetActiveInstanceTool {
    dispatcher: Arc<Dispatcher>,
}

impl SetActiveInstanceTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Tool for SetActiveInstanceTool {
    fn name(&self) -> &str {
        "set_active_instance"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "set_active_instance".into(),
            description: "Route this session's subsequent calls to one editor instance, selected by id or unique name."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "instance": {"type": "string", "description": "Instance id (e.g. 'Game@6400') or name"}
                },
                "required": ["instance"]
            }),
        }
    }

    async fn execute(&self, ctx: &SessionContext, args: &Value) -> DispatchResult {
        let selector = match arguments(args).and_then(|args| required_string(&args, "instance")) {
            Ok(selector) => selector,
            Err(e) => return DispatchResult::from_error(&e),
        };
        let Some(session) = ctx.session_id.as_deref() else {
            return DispatchResult::from_error(&BridgeError::type_mismatch(
                "session",
                "set_active_instance needs a session to pin",
            ));
        };

        let pin_ctx = SessionContext::new().with_session(session).with_instance(selector.trim());
        match instance::resolve(self.dispatcher.registry(), &pin_ctx).await {
            Ok(resolution) => {
                info!(session, instance = %resolution.id, "Active instance set");
                DispatchResult {
                    success: true,
                    data: Some(json!({"session": session, "instance": resolution.id})),
                    message: Some(format!("Session now routed to {}", resolution.id)),
                    routed_to: Some(Route {
                        instance: resolution.id.clone(),
                        resolved_by: resolution.resolved_by,
                    }),
                }
            }
            Err(e) => DispatchResult::from_error(&e),
        }
    }
}

pub struct DebugRequestContextTool {
    dispatcher: Arc<Dispatcher>,
}

impl DebugRequestContextTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Tool for DebugRequestContextTool {
    fn name(&self) -> &str {
        "debug_request_context"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "debug_request_context".into(),
            description: "Report the calling session, its routing state, known instances and bridge diagnostics."
                .into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(&self, ctx: &SessionContext, _args: &Value) -> DispatchResult {
        let registry = self.dispatcher.registry();
        let pinned = match ctx.session_id.as_deref() {
            Some(session) => registry.pinned(session).await,
            None => None,
        };
        let instances: Vec<Value> = registry
            .list()
            .await
            .iter()
            .map(|entry| serde_json::to_value(entry.summary()).unwrap_or(Value::Null))
            .collect();
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let argv: Vec<String> = std::env::args().collect();

        DispatchResult::ok(json!({
            "session": {
                "session_id": ctx.session_id,
                "instance_selector": ctx.instance,
                "pinned_instance": pinned,
            },
            "instances": instances,
            "server": {
                "version": env!("CARGO_PKG_VERSION"),
                "cwd": cwd,
                "argv": argv,
                "request_timeout_ms": self.dispatcher.request_timeout().as_millis() as u64,
            },
        }))
    }
}
