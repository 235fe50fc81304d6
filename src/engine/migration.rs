//! Load-time migration of stored panel documents.
//!
//! Every transform works on the raw JSON document, is gated on the version
//! stamp of the last save and is idempotent on its own. Unexpected shapes are
//! coerced, never rejected, so any old document still loads. The stamp itself
//! is left alone; the next save writes the current one.

use crate::engine::rewrite::namespace_legacy_script;
use crate::engine::version::Version;
use crate::error::Result;
use crate::model::{ElementType, PanelConfig};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};

/// Datasource lookup used to turn stored names into stable identifiers.
pub trait DatasourceRegistry {
    fn uid_for_name(&self, name: &str) -> Option<String>;

    fn has_uid(&self, _uid: &str) -> bool {
        false
    }
}

/// Registry with no datasources; every name resolves to nothing.
pub struct NoDatasources;

impl DatasourceRegistry for NoDatasources {
    fn uid_for_name(&self, _name: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    NamespaceScripts,
    PayloadMode,
    SectionIds,
    PayloadArtifacts,
    PayloadShape,
    AllowCustomValue,
    DatasourceUids,
}

impl Transform {
    pub fn describe(self) -> &'static str {
        match self {
            Transform::NamespaceScripts => "rewrote legacy script names into context namespaces",
            Transform::PayloadMode => "folded updatedOnly into payloadMode",
            Transform::SectionIds => "backfilled layout section ids",
            Transform::PayloadArtifacts => "removed index artifacts from stored payloads",
            Transform::PayloadShape => "replaced string payloads with objects",
            Transform::AllowCustomValue => "defaulted allowCustomValue",
            Transform::DatasourceUids => "resolved datasource names to uids",
        }
    }
}

pub const NAMESPACE_SCRIPTS_BEFORE: Version = Version::new(4, 0, 0);
pub const PAYLOAD_ARTIFACTS_BEFORE: Version = Version::new(4, 3, 0);
pub const DATASOURCE_UIDS_BEFORE: Version = Version::new(4, 0, 0);

const PHASES: [&str; 3] = ["initial", "update", "reset"];
const PHASE_SCRIPTS: [&str; 2] = ["code", "getPayload"];
const ELEMENT_SCRIPTS: [&str; 4] = ["showIf", "disableIf", "getOptions", "customCode"];

#[derive(Debug, Clone)]
pub struct Migrated {
    pub document: JsonValue,
    pub applied: Vec<Transform>,
}

/// Bring a stored document to the current schema. `previous_version`
/// overrides the document's own stamp when given.
pub fn migrate(
    document: JsonValue,
    previous_version: Option<&str>,
    registry: &dyn DatasourceRegistry,
) -> Migrated {
    let mut doc = match document {
        JsonValue::Object(map) => map,
        JsonValue::Null => Map::new(),
        other => {
            warn!(found = %kind_name(&other), "panel document is not an object, starting empty");
            Map::new()
        }
    };
    let stamp = previous_version
        .map(str::to_string)
        .or_else(|| doc.get("version").and_then(|v| v.as_str()).map(str::to_string));
    let from = Version::from_stamp(stamp.as_deref());

    let mut applied = Vec::new();
    let mut run = |t: Transform, changed: bool| {
        if changed {
            info!(transform = ?t, from = %from, "{}", t.describe());
            applied.push(t);
        }
    };

    if from < NAMESPACE_SCRIPTS_BEFORE {
        run(Transform::NamespaceScripts, namespace_scripts(&mut doc));
    }
    run(Transform::PayloadMode, fold_payload_mode(&mut doc));
    run(Transform::SectionIds, backfill_section_ids(&mut doc));
    if from < PAYLOAD_ARTIFACTS_BEFORE {
        run(Transform::PayloadArtifacts, strip_payload_artifacts(&mut doc));
    }
    run(Transform::PayloadShape, coerce_payload_shape(&mut doc));
    run(Transform::AllowCustomValue, default_allow_custom_value(&mut doc));
    if from < DATASOURCE_UIDS_BEFORE {
        run(Transform::DatasourceUids, resolve_datasource_uids(&mut doc, registry));
    }

    Migrated {
        document: JsonValue::Object(doc),
        applied,
    }
}

/// Migrate and deserialize in one step.
pub fn migrate_config(
    document: JsonValue,
    previous_version: Option<&str>,
    registry: &dyn DatasourceRegistry,
) -> Result<PanelConfig> {
    let migrated = migrate(document, previous_version, registry);
    PanelConfig::from_json(migrated.document)
}

fn kind_name(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn phases_mut(doc: &mut Map<String, JsonValue>) -> impl Iterator<Item = &mut Map<String, JsonValue>> {
    doc.iter_mut()
        .filter(|(k, _)| PHASES.contains(&k.as_str()))
        .filter_map(|(_, v)| v.as_object_mut())
}

fn elements_mut(doc: &mut Map<String, JsonValue>) -> impl Iterator<Item = &mut Map<String, JsonValue>> {
    doc.get_mut("elements")
        .and_then(|v| v.as_array_mut())
        .into_iter()
        .flatten()
        .filter_map(|e| e.as_object_mut())
}

fn rewrite_script_field(obj: &mut Map<String, JsonValue>, field: &str) -> bool {
    let Some(JsonValue::String(code)) = obj.get_mut(field) else {
        return false;
    };
    let rewritten = namespace_legacy_script(code);
    if rewritten == *code {
        return false;
    }
    *code = rewritten;
    true
}

fn namespace_scripts(doc: &mut Map<String, JsonValue>) -> bool {
    let mut changed = false;
    for phase in phases_mut(doc) {
        for field in PHASE_SCRIPTS {
            changed |= rewrite_script_field(phase, field);
        }
    }
    for el in elements_mut(doc) {
        for field in ELEMENT_SCRIPTS {
            changed |= rewrite_script_field(el, field);
        }
    }
    if let Some(reset) = doc.get_mut("resetAction").and_then(|v| v.as_object_mut()) {
        changed |= rewrite_script_field(reset, "code");
    }
    changed
}

fn fold_payload_mode(doc: &mut Map<String, JsonValue>) -> bool {
    let mut changed = false;
    for phase in phases_mut(doc) {
        let Some(updated_only) = phase.remove("updatedOnly") else {
            continue;
        };
        changed = true;
        if phase.get("payloadMode").map(|v| v.is_null()).unwrap_or(true) {
            let mode = if updated_only.as_bool().unwrap_or(false) {
                "updated"
            } else {
                "all"
            };
            phase.insert("payloadMode".into(), JsonValue::String(mode.into()));
        }
    }
    changed
}

fn backfill_section_ids(doc: &mut Map<String, JsonValue>) -> bool {
    let Some(sections) = doc
        .get_mut("layout")
        .and_then(|l| l.get_mut("sections"))
        .and_then(|s| s.as_array_mut())
    else {
        return false;
    };
    let mut changed = false;
    for section in sections.iter_mut().filter_map(|s| s.as_object_mut()) {
        let has_id = section
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if has_id {
            continue;
        }
        let name = section
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        section.insert("id".into(), JsonValue::String(name));
        changed = true;
    }
    changed
}

fn is_index_artifact(key: &str, value: &JsonValue) -> bool {
    key.parse::<u64>().is_ok()
        && value
            .as_str()
            .map(|s| s.chars().count() == 1)
            .unwrap_or(false)
}

fn strip_payload_artifacts(doc: &mut Map<String, JsonValue>) -> bool {
    let mut changed = false;
    for phase in phases_mut(doc) {
        if let Some(JsonValue::Object(payload)) = phase.get_mut("payload") {
            let before = payload.len();
            payload.retain(|k, v| !is_index_artifact(k, v));
            changed |= payload.len() != before;
        }
    }
    changed
}

fn coerce_payload_shape(doc: &mut Map<String, JsonValue>) -> bool {
    let mut changed = false;
    for phase in phases_mut(doc) {
        if let Some(payload) = phase.get_mut("payload") {
            if payload.is_string() {
                *payload = JsonValue::Object(Map::new());
                changed = true;
            }
        }
    }
    changed
}

fn default_allow_custom_value(doc: &mut Map<String, JsonValue>) -> bool {
    let mut changed = false;
    for el in elements_mut(doc) {
        let is_choice = el
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| ElementType::from(t.to_string()).allows_custom_value());
        if is_choice && el.get("allowCustomValue").map(|v| v.is_null()).unwrap_or(true) {
            el.insert("allowCustomValue".into(), JsonValue::Bool(false));
            changed = true;
        }
    }
    changed
}

fn resolve_datasource_uids(
    doc: &mut Map<String, JsonValue>,
    registry: &dyn DatasourceRegistry,
) -> bool {
    let mut changed = false;
    for phase in phases_mut(doc) {
        let Some(JsonValue::String(name)) = phase.get("datasource") else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let uid = match registry.uid_for_name(name) {
            Some(uid) => uid,
            None if registry.has_uid(name) => name.clone(),
            None => {
                warn!(datasource = %name, "datasource not found, clearing reference");
                String::new()
            }
        };
        if uid != *name {
            phase.insert("datasource".into(), JsonValue::String(uid));
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Registry(Vec<(&'static str, &'static str)>);

    impl DatasourceRegistry for Registry {
        fn uid_for_name(&self, name: &str) -> Option<String> {
            self.0.iter().find(|(n, _)| *n == name).map(|(_, u)| u.to_string())
        }

        fn has_uid(&self, uid: &str) -> bool {
            self.0.iter().any(|(_, u)| *u == uid)
        }
    }

    #[test]
    fn namespaces_scripts_before_4_0_and_is_idempotent() {
        let doc = json!({
            "version": "3.9.0",
            "initial": {"method": "-", "code": "return options.value"},
            "resetAction": {"mode": "custom", "code": "notifySuccess('cleared')"},
            "elements": [{"id": "a", "type": "string", "showIf": "return elements.length > 0"}]
        });
        let once = migrate(doc, None, &NoDatasources);
        assert_eq!(once.document["initial"]["code"], "return context.panel.options.value");
        assert_eq!(
            once.document["elements"][0]["showIf"],
            "return context.panel.elements.length > 0"
        );
        assert_eq!(
            once.document["resetAction"]["code"],
            "context.grafana.notifySuccess('cleared')"
        );
        assert!(once.applied.contains(&Transform::NamespaceScripts));

        let twice = migrate(once.document.clone(), Some("3.9.0"), &NoDatasources);
        assert_eq!(twice.document, once.document);
        assert!(twice.applied.is_empty());
    }

    #[test]
    fn current_documents_keep_scripts() {
        let doc = json!({"version": "4.1.0", "update": {"code": "return options.value"}});
        let out = migrate(doc, None, &NoDatasources);
        assert_eq!(out.document["update"]["code"], "return options.value");
    }

    #[test]
    fn folds_updated_only_into_payload_mode() {
        let doc = json!({
            "version": "4.4.0",
            "update": {"updatedOnly": true},
            "reset": {"updatedOnly": false},
            "initial": {"updatedOnly": true, "payloadMode": "custom"}
        });
        let out = migrate(doc, None, &NoDatasources).document;
        assert_eq!(out["update"]["payloadMode"], "updated");
        assert_eq!(out["reset"]["payloadMode"], "all");
        assert_eq!(out["initial"]["payloadMode"], "custom");
        assert!(out["update"].get("updatedOnly").is_none());
    }

    #[test]
    fn backfills_section_ids_from_names() {
        let doc = json!({"layout": {"sections": [{"name": "Main"}, {"id": "x", "name": "Other"}]}});
        let out = migrate(doc, Some("4.4.0"), &NoDatasources).document;
        assert_eq!(out["layout"]["sections"][0], json!({"name": "Main", "id": "Main"}));
        assert_eq!(out["layout"]["sections"][1]["id"], "x");
    }

    #[test]
    fn strips_index_artifacts_only_before_4_3() {
        let doc = json!({"update": {"payload": {"0": "a", "1": "b", "10": "long", "key": "v"}}});
        let out = migrate(doc.clone(), Some("4.2.0"), &NoDatasources).document;
        assert_eq!(out["update"]["payload"], json!({"10": "long", "key": "v"}));
        let kept = migrate(doc, Some("4.3.0"), &NoDatasources).document;
        assert_eq!(kept["update"]["payload"]["0"], "a");
    }

    #[test]
    fn string_payloads_become_objects() {
        let doc = json!({"initial": {"payload": "{ \"a\": 1 }"}});
        let out = migrate(doc, Some("4.4.0"), &NoDatasources).document;
        assert_eq!(out["initial"]["payload"], json!({}));
    }

    #[test]
    fn select_elements_get_allow_custom_value() {
        let doc = json!({"elements": [
            {"id": "s", "type": "select"},
            {"id": "m", "type": "multiselect", "allowCustomValue": true},
            {"id": "t", "type": "string"}
        ]});
        let out = migrate(doc, Some("4.4.0"), &NoDatasources).document;
        assert_eq!(out["elements"][0]["allowCustomValue"], false);
        assert_eq!(out["elements"][1]["allowCustomValue"], true);
        assert!(out["elements"][2].get("allowCustomValue").is_none());
    }

    #[test]
    fn resolves_datasource_names_to_uids() {
        let registry = Registry(vec![("Datasource 1", "ds1")]);
        let doc = json!({
            "version": "3.8.0",
            "initial": {"method": "datasource", "datasource": "Datasource 1"},
            "update": {"method": "datasource", "datasource": "Gone"},
            "reset": {"method": "datasource", "datasource": "ds1"}
        });
        let cfg = migrate_config(doc, None, &registry).unwrap();
        assert_eq!(cfg.initial.datasource, "ds1");
        assert_eq!(cfg.update.datasource, "");
        assert_eq!(cfg.reset.datasource, "ds1");
    }

    #[test]
    fn non_object_documents_load_empty() {
        let out = migrate(json!("garbage"), None, &NoDatasources);
        assert_eq!(out.document, json!({}));
        let cfg = PanelConfig::from_json(out.document).unwrap();
        assert!(cfg.elements.is_empty());
    }
}
