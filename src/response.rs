//! Uniform `{success, data, message}` results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::BridgeError;
use crate::instance::ResolvedBy;
use crate::transport::DispatchFailure;

/// Where a dispatched command went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub instance: String,
    pub resolved_by: ResolvedBy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set once the call got as far as picking an instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routed_to: Option<Route>,
}

impl DispatchResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            routed_to: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            data: None,
            message: Some(if message.is_empty() {
                "unknown error".to_string()
            } else {
                message
            }),
            routed_to: None,
        }
    }

    pub fn from_error(error: &BridgeError) -> Self {
        Self {
            success: false,
            data: Some(json!({ "error": error.kind().as_str() })),
            message: Some(error.to_string()),
            routed_to: None,
        }
    }

    pub fn from_failure(failure: &DispatchFailure) -> Self {
        Self {
            success: false,
            data: Some(json!({
                "error": failure.error.kind().as_str(),
                "attempts": failure.attempts,
            })),
            message: Some(failure.error.to_string()),
            routed_to: None,
        }
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routed_to = Some(route);
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"success": self.success}))
    }
}

/// Normalize a raw peer reply.
///
/// A mapping with a boolean `success` passes through with the result
/// invariants enforced. Anything else is a failure whose message is the
/// stringified reply.
pub fn normalize(raw: Value) -> DispatchResult {
    let mut map = match raw {
        Value::Object(map) => map,
        other => return DispatchResult::failure(stringify(&other)),
    };
    let Some(success) = map.get("success").and_then(Value::as_bool) else {
        return DispatchResult::failure(stringify(&Value::Object(map)));
    };

    if success {
        let data = match map.remove("data") {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(data) => data,
        };
        let message = map.remove("message").and_then(non_empty_string);
        return DispatchResult {
            success: true,
            data: Some(data),
            message,
            routed_to: None,
        };
    }

    let message = map
        .get("message")
        .cloned()
        .and_then(non_empty_string)
        .or_else(|| map.get("error").cloned().and_then(non_empty_string));
    let message = match message {
        Some(message) => message,
        None => stringify(&Value::Object(map.clone())),
    };
    let data = map.remove("data").filter(|d| !d.is_null());

    DispatchResult {
        success: false,
        data,
        message: Some(message),
        routed_to: None,
    }
}

fn non_empty_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Null | Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::String(_) => "empty response from instance".to_string(),
        other => other.to_string(),
    }
}
