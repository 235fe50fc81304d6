//! Dashboard variable interpolation: `${name}`, `${name:format}`, `[[name]]`
//! and `$name`. Unknown names are left untouched.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Single(String),
    Multi(Vec<String>),
}

impl VariableValue {
    fn format(&self, format: Option<&str>) -> String {
        match (self, format) {
            (VariableValue::Single(s), Some("json")) => JsonValue::String(s.clone()).to_string(),
            (VariableValue::Multi(v), Some("json")) => {
                serde_json::to_string(v).unwrap_or_else(|_| "[]".into())
            }
            (VariableValue::Single(s), _) => s.clone(),
            (VariableValue::Multi(v), Some("csv")) => v.join(","),
            (VariableValue::Multi(v), _) => {
                if v.len() == 1 {
                    v[0].clone()
                } else {
                    format!("{{{}}}", v.join(","))
                }
            }
        }
    }

    fn from_json(v: &JsonValue) -> Option<VariableValue> {
        match v {
            JsonValue::String(s) => Some(VariableValue::Single(s.clone())),
            JsonValue::Number(n) => Some(VariableValue::Single(n.to_string())),
            JsonValue::Bool(b) => Some(VariableValue::Single(b.to_string())),
            JsonValue::Array(items) => Some(VariableValue::Multi(
                items
                    .iter()
                    .map(|x| match x {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            // scoped vars come as {text, value}
            JsonValue::Object(obj) => obj.get("value").and_then(VariableValue::from_json),
            JsonValue::Null => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variables {
    #[serde(flatten)]
    values: BTreeMap<String, VariableValue>,
}

fn variable_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{(\w+)(?::(\w+))?\}|\[\[(\w+)\]\]|\$(\w+)")
            .unwrap_or_else(|e| panic!("variable pattern: {e}"))
    })
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: VariableValue) {
        self.values.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, VariableValue::Single(value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Variables as a JSON object, exposed to scripts.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Object(Map::new()))
    }

    /// Interpolate `text`. `scope` entries shadow dashboard variables; an
    /// explicit `${name:format}` wins over `format`.
    pub fn replace(
        &self,
        text: &str,
        scope: Option<&Map<String, JsonValue>>,
        format: Option<&str>,
    ) -> String {
        if !text.contains('$') && !text.contains("[[") {
            return text.to_string();
        }
        variable_regex()
            .replace_all(text, |caps: &Captures| {
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(3))
                    .or_else(|| caps.get(4))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                let fmt = caps.get(2).map(|m| m.as_str()).or(format);
                let scoped = scope
                    .and_then(|s| s.get(name))
                    .and_then(VariableValue::from_json);
                match scoped.as_ref().or_else(|| self.values.get(name)) {
                    Some(v) => v.format(fmt),
                    None => caps[0].to_string(),
                }
            })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Variables {
        let mut v = Variables::new().with("host", "db1");
        v.set(
            "regions",
            VariableValue::Multi(vec!["eu".into(), "us".into()]),
        );
        v
    }

    #[test]
    fn replaces_all_syntaxes() {
        let v = vars();
        assert_eq!(v.replace("$host/${host}/[[host]]", None, None), "db1/db1/db1");
        assert_eq!(v.replace("${regions}", None, None), "{eu,us}");
        assert_eq!(v.replace("${regions:csv}", None, None), "eu,us");
        assert_eq!(v.replace("${regions:json}", None, None), r#"["eu","us"]"#);
        assert_eq!(v.replace("${host}", None, Some("json")), r#""db1""#);
    }

    #[test]
    fn unknown_variables_are_kept() {
        let v = vars();
        assert_eq!(v.replace("$missing and ${nope}", None, None), "$missing and ${nope}");
        assert_eq!(v.replace("no vars", None, None), "no vars");
    }

    #[test]
    fn scope_shadows_dashboard_variables() {
        let v = vars();
        let scope = json!({"host": {"text": "Other", "value": "db2"}, "n": 3});
        let scope = scope.as_object().unwrap();
        assert_eq!(v.replace("$host:$n", Some(scope), None), "db2:3");
    }
}
