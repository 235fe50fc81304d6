//! Per-invocation inputs handed to hooks and the effects they request.
//!
//! Hooks never touch panel state directly. Each call gets a fresh input
//! struct, and every mutator a script calls is recorded as a [`HookEffect`]
//! that the panel applies after the hook returns.

use crate::engine::variables::Variables;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;

/// Host services reachable from scripts.
#[derive(Debug, Clone, Default)]
pub struct HookEnv {
    pub variables: Variables,
    /// Base directory for relative file handle paths.
    pub file_root: Option<PathBuf>,
}

impl HookEnv {
    pub fn new(variables: Variables) -> Self {
        Self {
            variables,
            file_root: None,
        }
    }
}

/// Input of `showIf`, `disableIf` and `getOptions`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PredicateInput {
    pub elements: JsonValue,
    pub data: JsonValue,
}

/// Input of lifecycle and custom-button action hooks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionInput {
    pub options: JsonValue,
    pub data: JsonValue,
    pub elements: JsonValue,
    pub response: JsonValue,
    pub initial: JsonValue,
    pub error: JsonValue,
}

/// Input of the get-payload hook.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PayloadInput {
    pub elements: JsonValue,
    pub initial: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationChange {
    Push(String),
    Partial { query: JsonValue, replace: bool },
    Reload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookEffect {
    ChangeElements(JsonValue),
    ChangeOptions(JsonValue),
    SetInitial(JsonValue),
    InitialRequest,
    Notify { level: NotifyLevel, message: String },
    Location(LocationChange),
    Publish { event: String, payload: JsonValue },
    RefreshVariables,
}

/// Result of an action hook: its resolved value plus the effects it asked for,
/// in call order. A hook that throws still reports the effects it requested
/// before the throw, with the rejection message in `failure`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    pub value: JsonValue,
    pub effects: Vec<HookEffect>,
    pub failure: Option<String>,
}

/// Notification text from the single argument scripts pass: strings as-is,
/// `[title, message]` arrays joined, anything else as JSON.
pub fn notification_text(arg: &JsonValue) -> String {
    match arg {
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(parts) => parts
            .iter()
            .map(|p| match p {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(": "),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalise a raw datasource response into `{data: [frames], error?}`.
///
/// Accepts the backend shape `{results: {refId: {frames, error}}}` (also
/// wrapped in `{data: ...}`), data-plane frames with
/// `schema.fields` + `data.values` columns, and plain frames.
pub fn normalize_query_response(raw: &JsonValue) -> JsonValue {
    let results = raw
        .get("results")
        .or_else(|| raw.get("data").and_then(|d| d.get("results")))
        .and_then(|r| r.as_object());
    let mut frames = Vec::new();
    let mut errors = Vec::new();
    match results {
        Some(results) => {
            for (ref_id, result) in results {
                if let Some(err) = result.get("error").and_then(|e| e.as_str()) {
                    errors.push(serde_json::json!({"refId": ref_id, "message": err}));
                }
                for frame in result
                    .get("frames")
                    .and_then(|f| f.as_array())
                    .into_iter()
                    .flatten()
                {
                    frames.push(normalize_frame(frame, Some(ref_id)));
                }
            }
        }
        None => {
            if let Some(list) = raw.get("data").and_then(|d| d.as_array()) {
                frames.extend(list.iter().map(|f| normalize_frame(f, None)));
            }
        }
    }
    let mut out = Map::new();
    out.insert("data".into(), JsonValue::Array(frames));
    if let Some(first) = errors.first() {
        out.insert("error".into(), first.clone());
        out.insert("errors".into(), JsonValue::Array(errors));
    }
    JsonValue::Object(out)
}

fn normalize_frame(frame: &JsonValue, ref_id: Option<&str>) -> JsonValue {
    let schema = frame.get("schema");
    let Some(schema_fields) = schema.and_then(|s| s.get("fields")).and_then(|f| f.as_array()) else {
        let mut plain = frame.clone();
        if let (Some(obj), Some(id)) = (plain.as_object_mut(), ref_id) {
            obj.entry("refId").or_insert_with(|| JsonValue::String(id.to_string()));
        }
        return plain;
    };
    let columns = frame
        .get("data")
        .and_then(|d| d.get("values"))
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let fields: Vec<JsonValue> = schema_fields
        .iter()
        .enumerate()
        .map(|(i, f)| {
            serde_json::json!({
                "name": f.get("name").cloned().unwrap_or(JsonValue::String(String::new())),
                "values": columns.get(i).cloned().unwrap_or(JsonValue::Array(vec![])),
            })
        })
        .collect();
    let ref_id = schema
        .and_then(|s| s.get("refId"))
        .and_then(|r| r.as_str())
        .or(ref_id);
    let mut out = Map::new();
    if let Some(id) = ref_id {
        out.insert("refId".into(), JsonValue::String(id.to_string()));
    }
    if let Some(name) = schema.and_then(|s| s.get("name")) {
        out.insert("name".into(), name.clone());
    }
    out.insert("fields".into(), JsonValue::Array(fields));
    JsonValue::Object(out)
}
