//! Persisted elements ⇄ runtime elements.
//!
//! A runtime element carries its compiled helpers and a synthetic `uid`
//! that identifies it across reorders and id edits.

use crate::error::{FormError, Result};
use crate::model::Element;
use crate::sandbox::hooks::{input_key, with_fallback, Evaluated, Helpers, Hook, HookCache};
use crate::sandbox::{HookEnv, PredicateInput};
use crate::services::frames::PanelData;
use serde_json::Value as JsonValue;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeElement {
    pub uid: String,
    /// Persisted fields; `element.uid` is kept empty while in session.
    pub element: Element,
    pub helpers: Helpers,
    /// Compile error that blocks this element until its script is fixed.
    pub blocked: Option<String>,
}

pub fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl RuntimeElement {
    /// Compile `element`'s scripts and take over (or mint) its uid.
    pub fn from_persisted(element: &Element) -> Result<RuntimeElement> {
        let helpers = Helpers::compile(
            element.show_if.as_deref(),
            element.disable_if.as_deref(),
            element.get_options.as_deref(),
        )?;
        let mut element = element.clone();
        let uid = element
            .uid
            .take()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(new_uid);
        Ok(RuntimeElement {
            uid,
            element,
            helpers,
            blocked: None,
        })
    }

    pub fn to_persisted(&self) -> Element {
        let mut el = self.element.clone();
        el.uid = Some(self.uid.clone());
        el
    }

    pub fn id(&self) -> &str {
        &self.element.id
    }

    pub fn value(&self) -> &JsonValue {
        &self.element.value
    }

    /// Evaluate `showIf` with the fallback policy and memo.
    pub fn is_shown(&self, input: &PredicateInput, env: &HookEnv, cache: &mut HookCache) -> Evaluated<bool> {
        if self.blocked.is_some() {
            return Evaluated {
                value: true,
                error: None,
            };
        }
        let hook = &self.helpers.show_if;
        let r = eval_cached(self, hook, input, cache, || hook.eval_predicate(input, env));
        with_fallback(r, true)
    }

    /// Evaluate `disableIf` with the fallback policy and memo. Blocked
    /// elements are always disabled.
    pub fn is_disabled(&self, input: &PredicateInput, env: &HookEnv, cache: &mut HookCache) -> Evaluated<bool> {
        if self.blocked.is_some() {
            return Evaluated {
                value: true,
                error: None,
            };
        }
        let hook = &self.helpers.disable_if;
        let r = eval_cached(self, hook, input, cache, || hook.eval_predicate(input, env));
        with_fallback(r, false)
    }
}

fn eval_cached(
    el: &RuntimeElement,
    hook: &Hook,
    input: &PredicateInput,
    cache: &mut HookCache,
    eval: impl FnOnce() -> Result<bool>,
) -> Result<bool> {
    if hook.is_default() {
        return eval();
    }
    cache
        .get_or_eval(&el.uid, hook, input_key(input), || eval().map(JsonValue::Bool))
        .map(|v| v.as_bool().unwrap_or(false))
}

/// Compile every element; the first script that does not compile fails the
/// whole conversion.
pub fn to_runtime(persisted: &[Element]) -> Result<Vec<RuntimeElement>> {
    persisted.iter().map(RuntimeElement::from_persisted).collect()
}

/// Like [`to_runtime`], but an element whose script fails to compile is kept
/// with default helpers and marked blocked; the errors are returned alongside.
pub fn to_runtime_partial(persisted: &[Element]) -> (Vec<RuntimeElement>, Vec<FormError>) {
    let mut errors = Vec::new();
    let runtime = persisted
        .iter()
        .map(|el| match RuntimeElement::from_persisted(el) {
            Ok(r) => r,
            Err(e) => {
                let mut element = el.clone();
                let uid = element.uid.take().filter(|u| !u.is_empty()).unwrap_or_else(new_uid);
                let blocked = Some(e.to_string());
                errors.push(e);
                RuntimeElement {
                    uid,
                    element,
                    helpers: Helpers::default(),
                    blocked,
                }
            }
        })
        .collect();
    (runtime, errors)
}

pub fn to_persisted(runtime: &[RuntimeElement]) -> Vec<Element> {
    runtime.iter().map(RuntimeElement::to_persisted).collect()
}

/// True iff another element (different uid) already has the candidate's
/// `(id, type)`.
pub fn conflict(existing: &[RuntimeElement], candidate: &RuntimeElement) -> bool {
    let hit = existing
        .iter()
        .any(|e| e.uid != candidate.uid && e.element.key() == candidate.element.key());
    if hit {
        debug!(id = %candidate.element.id, kind = %candidate.element.kind, "element conflict");
    }
    hit
}

pub fn conflict_error(candidate: &RuntimeElement) -> FormError {
    FormError::Conflict {
        id: candidate.element.id.clone(),
        kind: candidate.element.kind.to_string(),
    }
}

/// Elements as scripts see them: persisted shape plus `uid`.
pub fn elements_json(runtime: &[RuntimeElement]) -> JsonValue {
    serde_json::to_value(to_persisted(runtime)).unwrap_or(JsonValue::Array(Vec::new()))
}

/// `{id: value}` for every element.
pub fn values_by_id(runtime: &[RuntimeElement]) -> serde_json::Map<String, JsonValue> {
    runtime
        .iter()
        .map(|r| (r.element.id.clone(), r.element.value.clone()))
        .collect()
}

pub fn predicate_input(runtime: &[RuntimeElement], data: &PanelData) -> PredicateInput {
    PredicateInput {
        elements: elements_json(runtime),
        data: data.to_json(),
    }
}
