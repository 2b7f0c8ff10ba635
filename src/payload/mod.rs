//! Payload normalization for mapping-typed tool fields.
//!
//! A `properties`-style field may arrive as a native mapping, as a JSON
//! string, or as a Python-literal-like string. Strings are decoded as strict
//! JSON first and fall back to the restricted literal parser in
//! [`literal`]. The result is all-or-nothing: either a mapping or a typed
//! error naming the field and every stage that failed.

pub mod literal;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::coerce::value_kind;
use crate::error::{BridgeError, BridgeResult};

const PREVIEW_CHARS: usize = 100;

/// Which decoding strategy produced a normalized mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    Absent,
    Mapping,
    Json,
    Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub map: Map<String, Value>,
    pub source: PayloadSource,
}

impl Normalized {
    fn new(map: Map<String, Value>, source: PayloadSource) -> Self {
        Self { map, source }
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.map
    }
}

/// Normalize a payload field into a mapping.
///
/// Absent or `null` input yields an empty mapping. A mapping passes through
/// unchanged. A string is decoded as JSON, then as a literal expression; a
/// decoded value that is not a mapping is a `TypeMismatch`, and a string
/// neither stage accepts is a `Parse` error carrying both causes.
pub fn normalize(field: &str, raw: Option<&Value>) -> BridgeResult<Normalized> {
    let text = match raw {
        None | Some(Value::Null) => return Ok(Normalized::new(Map::new(), PayloadSource::Absent)),
        Some(Value::Object(map)) => {
            return Ok(Normalized::new(map.clone(), PayloadSource::Mapping));
        }
        Some(Value::String(text)) => text,
        Some(other) => {
            return Err(BridgeError::type_mismatch(
                field,
                format!(
                    "expected a mapping or a string, received {}",
                    value_kind(other)
                ),
            ));
        }
    };

    debug!(field, preview = %preview(text), "Decoding string payload");

    let json_error = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => {
            info!(field, "Parsed payload string as JSON");
            return Ok(Normalized::new(map, PayloadSource::Json));
        }
        Ok(other) => return Err(not_a_mapping(field, &other)),
        Err(e) => e.to_string(),
    };

    match literal::parse_literal(text) {
        Ok(Value::Object(map)) => {
            info!(field, "Parsed payload string as a literal expression");
            Ok(Normalized::new(map, PayloadSource::Literal))
        }
        Ok(other) => Err(not_a_mapping(field, &other)),
        Err(literal_error) => {
            info!(field, %json_error, %literal_error, "Payload string rejected by both decoders");
            Err(BridgeError::Parse {
                field: field.to_string(),
                json: json_error,
                literal: literal_error.to_string(),
            })
        }
    }
}

fn not_a_mapping(field: &str, value: &Value) -> BridgeError {
    BridgeError::type_mismatch(
        field,
        format!("must decode to a mapping; received {}", value_kind(value)),
    )
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
