//! Outbound request bodies.
//!
//! The payload is first computed as a JSON object under the request's
//! payload mode, then serialised either as interpolated JSON text (files
//! inlined as base64) or as multipart parts.

use super::files::FileRef;
use super::normalize::{elements_json, values_by_id, RuntimeElement};
use crate::error::{HookKind, Result};
use crate::model::{PayloadMode, RequestOptions, CONTENT_TYPE_TEXT};
use crate::sandbox::{HookEnv, Hook, PayloadInput};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

/// Values that differ from the initial snapshot. Read-only elements are left
/// out even when a script changed them.
pub fn updated_values(runtime: &[RuntimeElement], initial: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    runtime
        .iter()
        .filter(|r| !r.element.kind.is_read_only())
        .filter(|r| initial.get(&r.element.id).unwrap_or(&JsonValue::Null) != &r.element.value)
        .map(|r| (r.element.id.clone(), r.element.value.clone()))
        .collect()
}

/// Compute the payload object for `options`.
pub fn build(
    options: &RequestOptions,
    runtime: &[RuntimeElement],
    initial: &Map<String, JsonValue>,
    env: &HookEnv,
) -> Result<JsonValue> {
    let mode = options.effective_payload_mode();
    debug!(?mode, "building payload");
    match mode {
        PayloadMode::All => Ok(JsonValue::Object(values_by_id(runtime))),
        PayloadMode::Updated => Ok(JsonValue::Object(updated_values(runtime, initial))),
        PayloadMode::Custom => {
            let hook = Hook::compile(HookKind::GetPayload, Some(&options.get_payload))?;
            let input = PayloadInput {
                elements: elements_json(runtime),
                initial: JsonValue::Object(initial.clone()),
            };
            hook.run_payload(&input, env)
        }
    }
}

fn resolve_path(mut file: FileRef, env: &HookEnv) -> FileRef {
    if let (true, Some(root)) = (file.path.is_relative(), &env.file_root) {
        file.path = root.join(&file.path);
    }
    file
}

/// Replace every array of file handles (at any depth) with base64 strings.
pub fn inline_files(value: &JsonValue, env: &HookEnv) -> Result<JsonValue> {
    if let Some(files) = FileRef::list_from_value(value) {
        return files
            .into_iter()
            .map(|f| resolve_path(f, env).to_base64().map(JsonValue::String))
            .collect::<Result<Vec<_>>>()
            .map(JsonValue::Array);
    }
    Ok(match value {
        JsonValue::Object(obj) => {
            let mut out = Map::new();
            for (k, v) in obj {
                out.insert(k.clone(), inline_files(v, env)?);
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|v| inline_files(v, env))
                .collect::<Result<Vec<_>>>()?,
        ),
        other => other.clone(),
    })
}

/// JSON text of `payload` with files inlined and variables interpolated.
pub fn to_json_text(payload: &JsonValue, env: &HookEnv) -> Result<String> {
    let inlined = inline_files(payload, env)?;
    let text = serde_json::to_string(&inlined)
        .map_err(|e| crate::error::FormError::json("payload", e))?;
    Ok(env.variables.replace(&text, None, None))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text { name: String, value: String },
    File { name: String, file: FileRef },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartBody {
    pub parts: Vec<Part>,
}

impl MultipartBody {
    fn text(&mut self, name: impl Into<String>, value: &JsonValue) {
        let value = match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.parts.push(Part::Text {
            name: name.into(),
            value,
        });
    }

    fn file(&mut self, name: &str, file: FileRef) {
        self.parts.push(Part::File {
            name: name.to_string(),
            file,
        });
    }
}

/// Multipart form of `payload`: scalars become fields, arrays become
/// `key[i]` fields, file handles become binary parts under `key`. Null
/// values are skipped.
pub fn to_multipart(payload: &JsonValue, env: &HookEnv) -> MultipartBody {
    let mut body = MultipartBody::default();
    let Some(obj) = payload.as_object() else {
        return body;
    };
    for (key, value) in obj {
        if let Some(files) = FileRef::list_from_value(value) {
            for f in files {
                body.file(key, resolve_path(f, env));
            }
            continue;
        }
        if let Some(f) = FileRef::from_value(value) {
            body.file(key, resolve_path(f, env));
            continue;
        }
        match value {
            JsonValue::Null => {}
            JsonValue::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    body.text(format!("{key}[{i}]"), item);
                }
            }
            other => body.text(key.as_str(), other),
        }
    }
    body
}

/// A serialised request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(String),
    Text(String),
    Multipart(MultipartBody),
}

/// Serialise `payload` for the content type and method of `options`.
pub fn encode(options: &RequestOptions, payload: &JsonValue, env: &HookEnv) -> Result<Body> {
    if !options.method.has_body() {
        return Ok(Body::Empty);
    }
    if options.is_multipart() {
        return Ok(Body::Multipart(to_multipart(payload, env)));
    }
    let text = to_json_text(payload, env)?;
    if options.content_type.starts_with(CONTENT_TYPE_TEXT) {
        Ok(Body::Text(text))
    } else {
        Ok(Body::Json(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::normalize::to_runtime;
    use crate::engine::variables::Variables;
    use crate::model::{Element, ElementType, RequestMethod, CONTENT_TYPE_MULTIPART};
    use serde_json::json;

    fn runtime() -> Vec<RuntimeElement> {
        to_runtime(&[
            Element::new("a", ElementType::Number).with_value(1),
            Element::new("b", ElementType::Number).with_value(2),
        ])
        .unwrap()
    }

    fn initial() -> Map<String, JsonValue> {
        json!({"a": 1, "b": 5}).as_object().unwrap().clone()
    }

    fn opts(mode: PayloadMode) -> RequestOptions {
        RequestOptions {
            method: RequestMethod::Post,
            payload_mode: Some(mode),
            ..Default::default()
        }
    }

    #[test]
    fn all_and_updated_modes() {
        let env = HookEnv::default();
        let all = build(&opts(PayloadMode::All), &runtime(), &initial(), &env).unwrap();
        assert_eq!(all, json!({"a": 1, "b": 2}));
        let updated = build(&opts(PayloadMode::Updated), &runtime(), &initial(), &env).unwrap();
        assert_eq!(updated, json!({"b": 2}));
    }

    #[test]
    fn updated_skips_read_only_elements() {
        let rt = to_runtime(&[
            Element::new("ro", ElementType::Disabled).with_value("changed"),
            Element::new("new", ElementType::String).with_value("v"),
        ])
        .unwrap();
        let got = updated_values(&rt, &Map::new());
        assert_eq!(JsonValue::Object(got), json!({"new": "v"}));
    }

    #[test]
    fn legacy_updated_only_flag_selects_updated() {
        let options = RequestOptions {
            method: RequestMethod::Post,
            updated_only: Some(true),
            ..Default::default()
        };
        let got = build(&options, &runtime(), &initial(), &HookEnv::default()).unwrap();
        assert_eq!(got, json!({"b": 2}));
    }

    #[test]
    fn custom_mode_runs_payload_hook() {
        let options = RequestOptions {
            get_payload: "return { total: context.panel.elements.reduce((s, e) => s + e.value, 0), was: context.panel.initial.b };".into(),
            ..opts(PayloadMode::Custom)
        };
        let got = build(&options, &runtime(), &initial(), &HookEnv::default()).unwrap();
        assert_eq!(got, json!({"total": 3, "was": 5}));
    }

    #[test]
    fn json_text_inlines_files_and_interpolates() {
        let dir = std::env::temp_dir().join(format!("dynaform-payload-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), b"hello").unwrap();
        let env = HookEnv {
            variables: Variables::new().with("user", "ann"),
            file_root: Some(dir.clone()),
        };
        let payload = json!({
            "who": "$user",
            "nested": {"docs": [{"name": "a.txt", "path": "a.txt"}]}
        });
        let text = to_json_text(&payload, &env).unwrap();
        std::fs::remove_dir_all(&dir).ok();
        let parsed: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"who": "ann", "nested": {"docs": ["aGVsbG8="]}}));
    }

    #[test]
    fn multipart_flattens_arrays_and_keeps_files() {
        let payload = json!({
            "name": "x",
            "tags": ["a", 2],
            "skip": null,
            "upload": [{"name": "f.bin", "path": "/data/f.bin"}]
        });
        let body = to_multipart(&payload, &HookEnv::default());
        assert_eq!(
            body.parts,
            vec![
                Part::Text { name: "name".into(), value: "x".into() },
                Part::Text { name: "tags[0]".into(), value: "a".into() },
                Part::Text { name: "tags[1]".into(), value: "2".into() },
                Part::File {
                    name: "upload".into(),
                    file: FileRef {
                        name: "f.bin".into(),
                        path: "/data/f.bin".into(),
                        mime: None,
                        size: None
                    }
                },
            ]
        );
    }

    #[test]
    fn encode_respects_method_and_content_type() {
        let env = HookEnv::default();
        let p = json!({"a": 1});
        let get = RequestOptions {
            method: RequestMethod::Get,
            ..Default::default()
        };
        assert_eq!(encode(&get, &p, &env).unwrap(), Body::Empty);
        let post = opts(PayloadMode::All);
        assert_eq!(encode(&post, &p, &env).unwrap(), Body::Json(r#"{"a":1}"#.into()));
        let multi = RequestOptions {
            content_type: CONTENT_TYPE_MULTIPART.into(),
            ..opts(PayloadMode::All)
        };
        assert!(matches!(encode(&multi, &p, &env).unwrap(), Body::Multipart(_)));
    }
}
