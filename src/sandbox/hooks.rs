//! Compiled hooks and their evaluation policies.

use super::context::{ActionInput, ActionOutcome, HookEnv, PayloadInput, PredicateInput};
use super::engine;
use crate::error::{FormError, HookKind, Result};
use crate::model::ElementOption;
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::warn;

/// A syntax-checked user script bound to one extension point. An empty
/// script compiles to the hook's default behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Hook {
    kind: HookKind,
    source: Option<Arc<str>>,
}

impl Hook {
    pub fn compile(kind: HookKind, source: Option<&str>) -> Result<Hook> {
        let source = source.map(str::trim).filter(|s| !s.is_empty());
        if let Some(body) = source {
            engine::check_syntax(kind, body)?;
        }
        Ok(Hook {
            kind,
            source: source.map(Arc::from),
        })
    }

    pub fn default_for(kind: HookKind) -> Hook {
        Hook { kind, source: None }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.source.is_none()
    }

    /// `showIf` / `disableIf`. Default: shown, enabled.
    pub fn eval_predicate(&self, input: &PredicateInput, env: &HookEnv) -> Result<bool> {
        match &self.source {
            None => Ok(self.kind == HookKind::ShowIf),
            Some(body) => engine::eval_sync(self.kind, body, input, env).map(|v| truthy(&v)),
        }
    }

    /// `getOptions`. A non-array result is an empty list.
    pub fn eval_options(&self, input: &PredicateInput, env: &HookEnv) -> Result<Vec<ElementOption>> {
        match &self.source {
            None => Ok(Vec::new()),
            Some(body) => engine::eval_sync(self.kind, body, input, env).map(|v| options_from(&v)),
        }
    }

    /// Lifecycle or custom-button code. An empty hook resolves to `undefined`
    /// with no effects.
    pub fn run_action(&self, input: &ActionInput, env: &HookEnv) -> Result<ActionOutcome> {
        match &self.source {
            None => Ok(ActionOutcome::default()),
            Some(body) => engine::eval_async(self.kind, body, input, env),
        }
    }

    /// Custom payload code; the resolved value becomes the request body.
    pub fn run_payload(&self, input: &PayloadInput, env: &HookEnv) -> Result<JsonValue> {
        match &self.source {
            None => Ok(JsonValue::Object(Default::default())),
            Some(body) => {
                let out = engine::eval_async(self.kind, body, input, env)?;
                match out.failure {
                    Some(message) => Err(FormError::runtime(self.kind, message)),
                    None => Ok(out.value),
                }
            }
        }
    }
}

/// Compiled behaviour scripts of one runtime element.
#[derive(Debug, Clone, PartialEq)]
pub struct Helpers {
    pub show_if: Hook,
    pub disable_if: Hook,
    pub get_options: Hook,
}

impl Default for Helpers {
    fn default() -> Self {
        Helpers {
            show_if: Hook::default_for(HookKind::ShowIf),
            disable_if: Hook::default_for(HookKind::DisableIf),
            get_options: Hook::default_for(HookKind::GetOptions),
        }
    }
}

impl Helpers {
    pub fn compile(
        show_if: Option<&str>,
        disable_if: Option<&str>,
        get_options: Option<&str>,
    ) -> Result<Helpers> {
        Ok(Helpers {
            show_if: Hook::compile(HookKind::ShowIf, show_if)?,
            disable_if: Hook::compile(HookKind::DisableIf, disable_if)?,
            get_options: Hook::compile(HookKind::GetOptions, get_options)?,
        })
    }
}

/// A value computed under the predicate fallback policy, with the error that
/// forced the fallback, if any.
#[derive(Debug)]
pub struct Evaluated<T> {
    pub value: T,
    pub error: Option<FormError>,
}

impl<T> Evaluated<T> {
    fn ok(value: T) -> Self {
        Evaluated { value, error: None }
    }
}

/// Apply the fallback for a throwing predicate hook: `showIf` counts as
/// shown, `disableIf` as enabled, `getOptions` as no options.
pub fn with_fallback<T>(result: Result<T>, fallback: T) -> Evaluated<T> {
    match result {
        Ok(v) => Evaluated::ok(v),
        Err(e) => {
            warn!(error = %e, "predicate hook failed, using fallback");
            Evaluated {
                value: fallback,
                error: Some(e),
            }
        }
    }
}

/// JavaScript truthiness of a JSON-converted value.
pub fn truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn options_from(v: &JsonValue) -> Vec<ElementOption> {
    let Some(items) = v.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::Object(obj) => {
                let value = obj.get("value").cloned().unwrap_or(JsonValue::Null);
                let label = match obj.get("label") {
                    Some(JsonValue::String(s)) => s.clone(),
                    Some(JsonValue::Null) | None => plain_text(&value),
                    Some(other) => other.to_string(),
                };
                Some(ElementOption {
                    label,
                    value,
                    icon: obj.get("icon").and_then(|i| i.as_str()).map(str::to_string),
                })
            }
            JsonValue::Null => None,
            scalar => Some(ElementOption::new(plain_text(scalar), scalar.clone())),
        })
        .collect()
}

fn plain_text(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Hash of a predicate input, used as its identity for memoisation.
pub fn input_key(input: &PredicateInput) -> u64 {
    let mut h = DefaultHasher::new();
    input.elements.to_string().hash(&mut h);
    input.data.to_string().hash(&mut h);
    h.finish()
}

/// Memo of predicate results keyed by element uid and hook kind. An entry is
/// reused while the hook source and the input key are unchanged.
#[derive(Debug, Default)]
pub struct HookCache {
    entries: HashMap<(String, HookKind), Entry>,
}

#[derive(Debug)]
struct Entry {
    source: Option<Arc<str>>,
    input: u64,
    value: JsonValue,
}

impl HookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or compute. Failures are never cached.
    pub fn get_or_eval(
        &mut self,
        uid: &str,
        hook: &Hook,
        input: u64,
        eval: impl FnOnce() -> Result<JsonValue>,
    ) -> Result<JsonValue> {
        let key = (uid.to_string(), hook.kind);
        if let Some(e) = self.entries.get(&key) {
            if e.input == input && e.source == hook.source {
                return Ok(e.value.clone());
            }
        }
        let value = eval()?;
        self.entries.insert(
            key,
            Entry {
                source: hook.source.clone(),
                input,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    pub fn forget(&mut self, uid: &str) {
        self.entries.retain(|(u, _), _| u != uid);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
