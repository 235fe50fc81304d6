use crate::model::RequestPhase;
use crate::services::datasource::Datasources;
use crate::services::frames::PanelData;
use crate::services::request::{execute, RequestFailure, RequestPlan, Transport};
use serde_json::{Map, Value as JsonValue};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

/// Result of a background request, posted back to the UI loop.
pub struct LoadMsg {
    pub phase: RequestPhase,
    pub outcome: Result<JsonValue, RequestFailure>,
}

pub fn get_by_path<'a>(v: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return None;
    }
    let mut cur = v;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

/// Run `plan` on a worker thread and send the outcome on `tx`.
pub fn spawn_request(
    phase: RequestPhase,
    plan: RequestPlan,
    transport: Arc<dyn Transport>,
    datasources: Arc<Datasources>,
    tx: Sender<LoadMsg>,
) {
    thread::spawn(move || {
        let outcome = execute(&plan, transport.as_ref(), &datasources);
        let _ = tx.send(LoadMsg { phase, outcome });
    });
}

/// Element values carried by a response, keyed by element id.
///
/// REST responses are objects whose keys (or dotted paths) match element
/// ids. Datasource responses are frames; a field named like an element
/// contributes its first value.
pub fn values_from_response(response: &JsonValue, ids: &[&str]) -> Map<String, JsonValue> {
    let mut out = Map::new();
    if let Some(frames) = frames_of(response) {
        for id in ids {
            if let Some(v) = frames
                .frames()
                .find_map(|f| f.field(id))
                .and_then(|field| field.values.first())
            {
                out.insert(id.to_string(), v.clone());
            }
        }
        return out;
    }
    for id in ids {
        let hit = response.get(*id).or_else(|| get_by_path(response, id));
        if let Some(v) = hit {
            out.insert(id.to_string(), v.clone());
        }
    }
    out
}

fn frames_of(response: &JsonValue) -> Option<PanelData> {
    let is_query = response.get("results").is_some()
        || response.get("data").is_some_and(|d| d.is_array() || d.get("results").is_some());
    if !is_query {
        return None;
    }
    let normalized = crate::sandbox::context::normalize_query_response(response);
    let series = normalized.get("data").cloned().unwrap_or(JsonValue::Array(Vec::new()));
    serde_json::from_value(serde_json::json!({ "series": series })).ok()
}
