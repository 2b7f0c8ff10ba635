use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolSchema, arguments, required_action, send};
use crate::dispatch::Dispatcher;
use crate::envelope::{CommandEnvelope, EnvelopeBuilder};
use crate::error::BridgeResult;
use crate::instance::SessionContext;
use crate::response::DispatchResult;

const ACTIONS: &[&str] = &[
    "create",
    "load",
    "save",
    "get_hierarchy",
    "get_active",
    "get_build_settings",
    "screenshot",
];

pub struct ManageSceneTool {
    dispatcher: Arc<Dispatcher>,
}

impl ManageSceneTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn build(args: &Value) -> BridgeResult<CommandEnvelope> {
        let args = arguments(args)?;
        let action = required_action(&args, ACTIONS)?;

        Ok(EnvelopeBuilder::new("manage_scene")
            .action(&action)
            .string("name", args.get("name"))
            .string("path", args.get("path"))
            .int("buildIndex", args.get("build_index"))
            .string("parent", args.get("parent"))
            .int("pageSize", args.get("page_size"))
            .int("cursor", args.get("cursor"))
            .int("maxNodes", args.get("max_nodes"))
            .int("maxDepth", args.get("max_depth"))
            .int("maxChildrenPerNode", args.get("max_children_per_node"))
            .boolean("includeTransform", "include_transform", args.get("include_transform"))?
            .build())
    }
}

#[async_trait]
impl Tool for ManageSceneTool {
    fn name(&self) -> &str {
        "manage_scene"
    }

    fn schema(&self) -> ToolSchema {
        let int = json!({"type": ["integer", "string"]});
        ToolSchema {
            name: "manage_scene".into(),
            description: "Scene operations. For get_hierarchy, page through large scenes with page_size/cursor \
                and bound the walk with max_nodes, max_depth and max_children_per_node."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ACTIONS},
                    "name": {"type": "string", "description": "Scene name"},
                    "path": {"type": "string", "description": "Scene asset path"},
                    "build_index": int.clone(),
                    "parent": {"type": "string", "description": "Root object for get_hierarchy"},
                    "page_size": int.clone(),
                    "cursor": int.clone(),
                    "max_nodes": int.clone(),
                    "max_depth": int.clone(),
                    "max_children_per_node": int,
                    "include_transform": {"type": ["boolean", "string"]}
                },
                "required": ["action"]
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

    #[tokio::test]
    async fn hierarchy_paging_params_pass_through() {
        let (dispatcher, captured) = capturing_dispatcher().await;
        let tool = ManageSceneTool::new(dispatcher);

        let result = tool
            .execute(
                &SessionContext::new(),
                &json!({
                    "action": "get_hierarchy",
                    "parent": "Player",
                    "page_size": "10",
                    "cursor": "20",
                    "max_nodes": "1000",
                    "max_depth": "6",
                    "max_children_per_node": "200",
                    "include_transform": "true",
                }),
            )
            .await;

        assert!(result.success);
        assert_eq!(
            last_params(&captured),
            json!({
                "action": "get_hierarchy",
                "parent": "Player",
                "pageSize": 10,
                "cursor": 20,
                "maxNodes": 1000,
                "maxDepth": 6,
                "maxChildrenPerNode": 200,
                "includeTransform": true,
            })
        );
    }

    #[test]
    fn invalid_action_is_rejected_locally() {
        assert!(ManageSceneTool::build(&json!({"action": "destroy_everything"})).is_err());
    }

    #[tokio::test]
    async fn schema_lists_paging_params() {
        let (dispatcher, _) = capturing_dispatcher().await;
        let schema = ManageSceneTool::new(dispatcher).schema().parameters;
        for name in [
            "parent",
            "page_size",
            "cursor",
            "max_nodes",
            "max_depth",
            "max_children_per_node",
            "include_transform",
        ] {
            assert!(schema["properties"].get(name).is_some(), "missing {}", name);
        }
    }
}
