//! Effective choice lists for select, radio, multiselect and checkbox-list
//! elements.

use super::normalize::RuntimeElement;
use crate::error::{FormError, Result};
use crate::model::{ElementOption, OptionsSource, QueryOptions};
use crate::sandbox::hooks::{input_key, with_fallback, Evaluated, HookCache};
use crate::sandbox::{HookEnv, PredicateInput};
use crate::services::frames::PanelData;
use serde_json::Value as JsonValue;

/// Options of `el` under its active source. Only the `Code` source can fail;
/// its failure yields an empty list plus the error.
pub fn resolve(
    el: &RuntimeElement,
    data: &PanelData,
    input: &PredicateInput,
    env: &HookEnv,
    cache: &mut HookCache,
) -> Evaluated<Vec<ElementOption>> {
    let ok = |value| Evaluated { value, error: None };
    match el.element.options_source() {
        OptionsSource::Custom => ok(el.element.options.clone().unwrap_or_default()),
        OptionsSource::Query => ok(el
            .element
            .query_options
            .as_ref()
            .map(|q| from_query(q, data))
            .unwrap_or_default()),
        OptionsSource::Code => {
            if el.blocked.is_some() {
                return ok(Vec::new());
            }
            let hook = &el.helpers.get_options;
            let r = cache
                .get_or_eval(&el.uid, hook, input_key(input), || {
                    let opts = hook.eval_options(input, env)?;
                    Ok(serde_json::to_value(opts).unwrap_or(JsonValue::Array(Vec::new())))
                })
                .map(|v| serde_json::from_value(v).unwrap_or_default());
            with_fallback(r, Vec::new())
        }
    }
}

/// Pair the value field with the label field of one frame, positionally.
/// Unresolvable coordinates give an empty list.
pub fn from_query(q: &QueryOptions, data: &PanelData) -> Vec<ElementOption> {
    let Some(frame) = data.frame(&q.source) else {
        return Vec::new();
    };
    let Some(values) = frame.field(&q.value) else {
        return Vec::new();
    };
    let labels = match q.label.as_str() {
        "" => values,
        name => frame.field(name).unwrap_or(values),
    };
    values
        .values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let label = labels.values.get(i).unwrap_or(value);
            ElementOption::new(text_of(label), value.clone())
        })
        .collect()
}

fn text_of(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Split a `source:field` reference.
pub fn parse_field_ref(field_ref: &str) -> (&str, &str) {
    field_ref.split_once(':').unwrap_or(("", field_ref))
}

/// Choose a new value field. The label selection survives only when the new
/// field lives in the same source frame.
pub fn select_query_value(current: &QueryOptions, field_ref: &str) -> QueryOptions {
    let (source, value) = parse_field_ref(field_ref);
    let label = if source == current.source {
        current.label.clone()
    } else {
        String::new()
    };
    QueryOptions {
        source: source.to_string(),
        value: value.to_string(),
        label,
    }
}

/// Choose a label field. Fields from another frame are ignored; an empty
/// reference clears the label.
pub fn select_query_label(current: &QueryOptions, field_ref: &str) -> QueryOptions {
    let mut next = current.clone();
    if field_ref.is_empty() {
        next.label.clear();
        return next;
    }
    let (source, label) = parse_field_ref(field_ref);
    if source == current.source {
        next.label = label.to_string();
    }
    next
}

/// True when another option (not at `skip`) already uses `value`.
pub fn option_conflict(options: &[ElementOption], value: &JsonValue, skip: Option<usize>) -> bool {
    options
        .iter()
        .enumerate()
        .any(|(i, o)| Some(i) != skip && &o.value == value)
}

fn conflict_error(value: &JsonValue) -> FormError {
    FormError::OptionConflict {
        value: text_of(value),
    }
}

pub fn add_option(options: &mut Vec<ElementOption>, option: ElementOption) -> Result<()> {
    if option_conflict(options, &option.value, None) {
        return Err(conflict_error(&option.value));
    }
    options.push(option);
    Ok(())
}

pub fn update_option(options: &mut [ElementOption], index: usize, option: ElementOption) -> Result<()> {
    if option_conflict(options, &option.value, Some(index)) {
        return Err(conflict_error(&option.value));
    }
    match options.get_mut(index) {
        Some(slot) => {
            *slot = option;
            Ok(())
        }
        None => Err(FormError::UnknownElement(format!("option #{index}"))),
    }
}
