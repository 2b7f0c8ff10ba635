//! Command envelope construction.
//!
//! Tools describe their fields through [`EnvelopeBuilder`]; coercion happens
//! in the setters, remaps run at [`EnvelopeBuilder::build`], and absent
//! fields never reach the wire.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::coerce::{coerce_bool, coerce_int, coerce_string, coerce_string_list};
use crate::error::BridgeResult;

/// A command ready for transmission: name plus ordered parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandEnvelope {
    pub command: String,
    pub params: Map<String, Value>,
}

impl CommandEnvelope {
    pub fn action(&self) -> Option<&str> {
        self.params.get("action").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
enum Remap {
    QueryPrefix {
        scope: String,
        filter: String,
        prefix: String,
        safe_default: String,
    },
    CopyIfAbsent {
        from: String,
        to: String,
    },
}

#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    command: String,
    fields: Vec<(String, Option<Value>)>,
    remaps: Vec<Remap>,
}

impl EnvelopeBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fields: Vec::new(),
            remaps: Vec::new(),
        }
    }

    fn set(mut self, key: &str, value: Option<Value>) -> Self {
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key.to_string(), value));
        }
        self
    }

    /// Set the action, trimmed and lower-cased. Always the first parameter.
    pub fn action(mut self, action: &str) -> Self {
        let action = Value::String(action.trim().to_lowercase());
        self.fields.retain(|(k, _)| k != "action");
        self.fields.insert(0, ("action".to_string(), Some(action)));
        self
    }

    pub fn int(self, key: &str, value: Option<&Value>) -> Self {
        let value = coerce_int(value).map(Value::from);
        self.set(key, value)
    }

    /// Set a boolean field. `field` names the agent-facing argument in errors.
    pub fn boolean(self, key: &str, field: &str, value: Option<&Value>) -> BridgeResult<Self> {
        let value = coerce_bool(field, value)?.map(Value::Bool);
        Ok(self.set(key, value))
    }

    pub fn string_list(self, key: &str, value: Option<&Value>) -> Self {
        let value = coerce_string_list(value).map(|list| Value::Array(list.into_iter().map(Value::String).collect()));
        self.set(key, value)
    }

    pub fn string(self, key: &str, value: Option<&Value>) -> Self {
        let value = coerce_string(value).map(Value::String);
        self.set(key, value)
    }

    /// Set an already-normalized mapping.
    pub fn mapping(self, key: &str, map: Option<Map<String, Value>>) -> Self {
        self.set(key, map.map(Value::Object))
    }

    /// Set a raw value. `null` counts as absent.
    pub fn value(self, key: &str, value: Option<Value>) -> Self {
        self.set(key, value.filter(|v| !v.is_null()))
    }

    /// When `scope` holds a query starting with `prefix` and `filter` is
    /// unset, move the query into `filter` and reset `scope` to
    /// `safe_default`.
    pub fn remap_query_prefix(mut self, scope: &str, filter: &str, prefix: &str, safe_default: &str) -> Self {
        self.remaps.push(Remap::QueryPrefix {
            scope: scope.to_string(),
            filter: filter.to_string(),
            prefix: prefix.to_string(),
            safe_default: safe_default.to_string(),
        });
        self
    }

    /// When `to` is unset and `from` holds a non-empty string, copy it.
    pub fn copy_if_absent(mut self, from: &str, to: &str) -> Self {
        self.remaps.push(Remap::CopyIfAbsent {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn build(self) -> CommandEnvelope {
        let mut fields = self.fields;

        for remap in &self.remaps {
            match remap {
                Remap::QueryPrefix {
                    scope,
                    filter,
                    prefix,
                    safe_default,
                } => {
                    let query = non_empty_str(&fields, scope).map(str::trim).map(str::to_string);
                    if let Some(query) = query
                        && query.starts_with(prefix.as_str())
                        && non_empty_str(&fields, filter).is_none()
                    {
                        upsert(&mut fields, filter, Value::String(query));
                        upsert(&mut fields, scope, Value::String(safe_default.clone()));
                    }
                }
                Remap::CopyIfAbsent { from, to } => {
                    if is_unset(&fields, to)
                        && let Some(value) = non_empty_str(&fields, from).map(str::to_string)
                    {
                        upsert(&mut fields, to, Value::String(value));
                    }
                }
            }
        }

        let params = fields
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();

        CommandEnvelope {
            command: self.command,
            params,
        }
    }
}

fn lookup<'a>(fields: &'a [(String, Option<Value>)], key: &str) -> Option<&'a Value> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.as_ref())
}

fn non_empty_str<'a>(fields: &'a [(String, Option<Value>)], key: &str) -> Option<&'a str> {
    lookup(fields, key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn is_unset(fields: &[(String, Option<Value>)], key: &str) -> bool {
    match lookup(fields, key) {
        None => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn upsert(fields: &mut Vec<(String, Option<Value>)>, key: &str, value: Value) {
    match fields.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = Some(value),
        None => fields.push((key.to_string(), Some(value))),
    }
}
