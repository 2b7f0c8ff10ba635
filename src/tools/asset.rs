use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolSchema, arguments, required_action, required_string, send};
use crate::coerce::coerce_bool;
use crate::dispatch::Dispatcher;
use crate::envelope::{CommandEnvelope, EnvelopeBuilder};
use crate::error::BridgeResult;
use crate::instance::SessionContext;
use crate::payload;
use crate::response::DispatchResult;

const ACTIONS: &[&str] = &[
    "import",
    "create",
    "modify",
    "delete",
    "duplicate",
    "move",
    "rename",
    "search",
    "get_info",
    "create_folder",
    "get_components",
];

pub struct ManageAssetTool {
    dispatcher: Arc<Dispatcher>,
}

impl ManageAssetTool {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    fn build(args: &Value) -> BridgeResult<CommandEnvelope> {
        let args = arguments(args)?;
        let action = required_action(&args, ACTIONS)?;
        let path = required_string(&args, "path")?;
        let properties = payload::normalize("properties", args.get("properties"))?;
        let generate_preview = coerce_bool("generate_preview", args.get("generate_preview"))?.unwrap_or(false);

        let mut builder = EnvelopeBuilder::new("manage_asset")
            .action(&action)
            .value("path", Some(Value::String(path)))
            .string("assetType", args.get("asset_type"))
            .mapping("properties", Some(properties.into_map()))
            .string("destination", args.get("destination"))
            .value("generatePreview", Some(Value::Bool(generate_preview)))
            .string("searchPattern", args.get("search_pattern"))
            .string("filterType", args.get("filter_type"))
            .string("filterDateAfter", args.get("filter_date_after"))
            .int("pageSize", args.get("page_size"))
            .int("pageNumber", args.get("page_number"));

        // `path` is a folder scope; a query placed there would search the whole project.
        if action == "search" {
            builder = builder
                .remap_query_prefix("path", "searchPattern", "t:", "Assets")
                .copy_if_absent("assetType", "filterType");
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl Tool for ManageAssetTool {
    fn name(&self) -> &str {
        "manage_asset"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "manage_asset".into(),
            description: "Performs asset operations (import, create, modify, delete, search, ...) in the editor. \
                For action=\"search\", prefer paging (page_size, page_number) and keep generate_preview=false."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ACTIONS},
                    "path": {
                        "type": "string",
                        "description": "Asset path (e.g. 'Materials/MyMaterial.mat') or search scope (e.g. 'Assets')"
                    },
                    "asset_type": {"type": "string", "description": "Asset type, required for 'create'"},
                    "properties": {
                        "type": ["object", "string"],
                        "description": "Mapping (or JSON string) of properties for 'create'/'modify'"
                    },
                    "destination": {"type": "string", "description": "Target path for 'duplicate'/'move'"},
                    "generate_preview": {"type": "boolean", "default": false},
                    "search_pattern": {
                        "type": "string",
                        "description": "Search pattern, e.g. '*.prefab' or 't:MonoScript'"
                    },
                    "filter_type": {"type": "string"},
                    "filter_date_after": {"type": "string"},
                    "page_size": {"type": ["integer", "string"], "description": "Recommended: 25"},
                    "page_number": {"type": ["integer", "string"], "description": "1-based"}
                },
                "required": ["action", "path"]
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
    fn search_query_in_path_is_remapped() {
        let env = ManageAssetTool::build(&json!({
            "action": "search",
            "path": "t:MonoScript",
            "asset_type": "MonoScript",
        }))
        .unwrap();
        assert_eq!(env.params["path"], json!("Assets"));
        assert_eq!(env.params["searchPattern"], json!("t:MonoScript"));
        assert_eq!(env.params["filterType"], json!("MonoScript"));
        assert_eq!(env.params["assetType"], json!("MonoScript"));
    }

    #[test]
    fn non_search_actions_keep_path() {
        let env = ManageAssetTool::build(&json!({
            "action": "CREATE",
            "path": "t:Odd/Folder",
            "asset_type": "Material",
            "properties": "{'color': [1, 0, 0, 1]}",
        }))
        .unwrap();
        assert_eq!(
            Value::Object(env.params),
            json!({
                "action": "create",
                "path": "t:Odd/Folder",
                "assetType": "Material",
                "properties": {"color": [1, 0, 0, 1]},
                "generatePreview": false,
            })
        );
    }

    #[test]
    fn paging_is_coerced() {
        let env = ManageAssetTool::build(&json!({
            "action": "search",
            "path": "Assets",
            "page_size": "25",
            "page_number": 2.0,
        }))
        .unwrap();
        assert_eq!(env.params["pageSize"], json!(25));
        assert_eq!(env.params["pageNumber"], json!(2));
    }

    #[tokio::test]
    async fn bad_properties_fail_before_sending() {
        let (dispatcher, captured) = capturing_dispatcher().await;
        let tool = ManageAssetTool::new(dispatcher);

        let result = tool
            .execute(
                &SessionContext::new(),
                &json!({"action": "modify", "path": "Assets/A.mat", "properties": "not json {}"}),
            )
            .await;
        assert!(!result.success);
        let message = result.message.unwrap();
        assert!(message.contains("JSON error"), "{}", message);
        assert!(message.contains("literal error"), "{}", message);
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn valid_call_reaches_the_instance() {
        let (dispatcher, captured) = capturing_dispatcher().await;
        let tool = ManageAssetTool::new(dispatcher);

        let result = tool
            .execute(
                &SessionContext::new(),
                &json!({"action": "get_info", "path": "Assets/A.mat"}),
            )
            .await;
        assert!(result.success);
        let params = last_params(&captured);
        assert_eq!(params["action"], json!("get_info"));
        assert_eq!(params["properties"], json!({}));
    }
}
