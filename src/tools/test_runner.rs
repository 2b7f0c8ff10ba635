use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolSchema, arguments, send};
use crate::coerce::coerce_string;
use crate::dispatch::Dispatcher;
use crate::envelope::{CommandEnvelope, EnvelopeBuilder};
use crate::error::{BridgeError, BridgeResult};
use crate::instance::SessionContext;
use crate::response::DispatchResult;

const MODES: &[&str] = &["EditMode", "PlayMode"];

pub struct RunTestsTool {
    dispatcher: Arc<Dispatcher>,
}

impl RunTestsTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn build(args: &Value) -> BridgeResult<CommandEnvelope> {
        let args = arguments(args)?;
        let mode = mode(args.get("mode"))?;

        Ok(EnvelopeBuilder::new("run_tests")
            .value("mode", Some(Value::String(mode.to_string())))
            .int("timeoutSeconds", args.get("timeout_seconds"))
            .string_list("testNames", args.get("test_names"))
            .string_list("groupNames", args.get("group_names"))
            .string_list("categoryNames", args.get("category_names"))
            .string_list("assemblyNames", args.get("assembly_names"))
            .build())
    }
}

fn mode(value: Option<&Value>) -> BridgeResult<&'static str> {
    let Some(raw) = coerce_string(value).filter(|s| !s.trim().is_empty()) else {
        return Ok(MODES[0]);
    };
    MODES
        .iter()
        .copied()
        .find(|m| m.eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| {
            BridgeError::type_mismatch("mode", format!("expected EditMode or PlayMode, received '{}'", raw))
        })
}

#[async_trait]
impl Tool for RunTestsTool {
    fn name(&self) -> &str {
        "run_tests"
    }

    fn schema(&self) -> ToolSchema {
        let list = json!({"type": ["array", "string"], "items": {"type": "string"}});
        ToolSchema {
            name: "run_tests".into(),
            description: "Runs editor tests for the specified mode".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "mode": {"type": "string", "enum": MODES, "default": "EditMode"},
                    "timeout_seconds": {"type": ["integer", "string"], "description": "Optional timeout for the test run"},
                    "test_names": list.clone(),
                    "group_names": list.clone(),
                    "category_names": list.clone(),
                    "assembly_names": list
                }
            }),
        }
    }

    async fn execute(&self, ctx: &SessionContext, args: &Value) -> DispatchResult {
        send(&self.dispatcher, self.name(), ctx, Self::build(args)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{capturing_dispatcher, last_params};

    #[test]
    fn defaults_to_edit_mode_without_filters() {
        let env = RunTestsTool::build(&json!({})).unwrap();
        assert_eq!(env.command, "run_tests");
        assert_eq!(env.action(), None);
        assert_eq!(Value::Object(env.params), json!({"mode": "EditMode"}));
    }

    #[test]
    fn lists_and_timeout_are_coerced() {
        let env = RunTestsTool::build(&json!({
            "mode": "playmode",
            "timeout_seconds": "120",
            "test_names": "MyTests.Smoke",
            "group_names": ["Fast.*", " ", null],
            "category_names": [],
            "assembly_names": "   ",
        }))
        .unwrap();
        assert_eq!(
            Value::Object(env.params),
            json!({
                "mode": "PlayMode",
                "timeoutSeconds": 120,
                "testNames": ["MyTests.Smoke"],
                "groupNames": ["Fast.*"],
            })
        );
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = RunTestsTool::build(&json!({"mode": "BatchMode"})).unwrap_err();
        assert!(err.to_string().starts_with("mode:"));
    }

    #[tokio::test]
    async fn sends_run_tests_command() {
        let (dispatcher, captured) = capturing_dispatcher().await;
        let tool = RunTestsTool::new(dispatcher);
        let result = tool
            .execute(&SessionContext::new(), &json!({"test_names": ["A", "B"]}))
            .await;
        assert!(result.success);
        assert_eq!(last_params(&captured)["testNames"], json!(["A", "B"]));
        assert_eq!(captured.lock().unwrap()[0].command, "run_tests");
    }
}
