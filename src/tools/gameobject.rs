use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolSchema, arguments, required_action, send};
use crate::coerce::coerce_string;
use crate::dispatch::Dispatcher;
use crate::envelope::{CommandEnvelope, EnvelopeBuilder};
use crate::error::BridgeResult;
use crate::instance::SessionContext;
use crate::payload::{self, PayloadSource};
use crate::response::DispatchResult;

const ACTIONS: &[&str] = &[
    "create",
    "modify",
    "delete",
    "find",
    "get_components",
    "get_component",
    "add_component",
    "remove_component",
    "set_component_property",
];

pub struct ManageGameObjectTool {
    dispatcher: Arc<Dispatcher>,
}

impl ManageGameObjectTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn build(args: &Value) -> BridgeResult<CommandEnvelope> {
        let args = arguments(args)?;
        let action = required_action(&args, ACTIONS)?;
        let component_properties =
            payload::normalize("component_properties", args.get("component_properties"))?;
        let component_properties =
            (component_properties.source != PayloadSource::Absent).then(|| component_properties.into_map());

        let mut builder = EnvelopeBuilder::new("manage_gameobject")
            .action(&action)
            .string("target", args.get("target"))
            .string("searchMethod", args.get("search_method"))
            .string("name", args.get("name"))
            .string("tag", args.get("tag"))
            .string("parent", args.get("parent"))
            .string("layer", args.get("layer"))
            .string("searchTerm", args.get("search_term"))
            .boolean("findAll", "find_all", args.get("find_all"))?
            .boolean("searchInactive", "search_inactive", args.get("search_inactive"))?
            .boolean("searchInChildren", "search_in_children", args.get("search_in_children"))?
            .boolean("includeProperties", "include_properties", args.get("include_properties"))?
            .int("pageSize", args.get("page_size"))
            .int("cursor", args.get("cursor"))
            .int("maxComponents", args.get("max_components"))
            .mapping("componentProperties", component_properties);

        let by_tag = coerce_string(args.get("search_method"))
            .is_some_and(|m| m.trim().eq_ignore_ascii_case("by_tag"));
        if action == "find" && by_tag {
            builder = builder.copy_if_absent("tag", "searchTerm");
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Tool for ManageGameObjectTool {
    fn name(&self) -> &str {
        "manage_gameobject"
    }

    fn schema(&self) -> ToolSchema {
        let int = json!({"type": ["integer", "string"]});
        let flag = json!({"type": ["boolean", "string"]});
        ToolSchema {
            name: "manage_gameobject".into(),
            description: "Create, modify, find and inspect scene objects and their components. \
                Use page_size/cursor and max_components when listing components."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ACTIONS},
                    "target": {"type": "string", "description": "Object name, path or instance id"},
                    "search_method": {
                        "type": "string",
                        "description": "by_name, by_id, by_path, by_tag, by_layer or by_component"
                    },
                    "name": {"type": "string"},
                    "tag": {"type": "string"},
                    "parent": {"type": "string"},
                    "layer": {"type": "string"},
                    "search_term": {"type": "string"},
                    "find_all": flag.clone(),
                    "search_inactive": flag.clone(),
                    "search_in_children": flag.clone(),
                    "include_properties": flag,
                    "page_size": int.clone(),
                    "cursor": int.clone(),
                    "max_components": int,
                    "component_properties": {
                        "type": ["object", "string"],
                        "description": "Mapping (or JSON string) of component name to property values"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    async fn execute(&self, ctx: &SessionContext, args: &Value) -> DispatchResult {
        send(&self.dispatcher, self.name(), ctx, Self::build(args)).await
    }
}
