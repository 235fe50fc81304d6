//! Panel runtime: request lifecycle, hook execution and effect application.
//!
//! `update` never performs I/O. Requests leave as [`Effect::Send`] and come
//! back as [`AppMsg::Loaded`]; hooks run inline since they only compute.

use crate::engine::normalize::{
    elements_json, predicate_input, to_runtime_partial, values_by_id, RuntimeElement,
};
use crate::engine::{options, payload};
use crate::error::{FormError, HookKind};
use crate::model::{
    Element, ElementOption, ElementType, PanelConfig, RequestMethod, RequestPhase,
    ResetActionMode,
};
use crate::sandbox::{ActionInput, HookCache, HookEffect, HookEnv, Hook, LocationChange, NotifyLevel};
use crate::services::frames::PanelData;
use crate::services::loader::values_from_response;
use crate::services::request::{HttpRequest, RequestFailure, RequestPlan};
use serde_json::{json, Map, Value as JsonValue};
use tracing::{info, warn};

pub enum AppMsg {
    /// Run the initial request (or the initial hook alone).
    Start,
    Loaded {
        phase: RequestPhase,
        outcome: Result<JsonValue, RequestFailure>,
    },
    SetValue {
        uid: String,
        value: JsonValue,
    },
    Submit,
    Confirm(bool),
    Reset,
    RunButton(String),
    ConfigReplaced(PanelConfig),
    DataChanged(PanelData),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send { phase: RequestPhase, plan: RequestPlan },
    RerunInitial,
    Notify { level: NotifyLevel, text: String },
    Navigate(LocationChange),
    PersistConfig(Box<PanelConfig>),
}

/// An action waiting for the user's confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Submit,
    Reset,
}

/// One visible element as the renderer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementView {
    pub uid: String,
    pub id: String,
    pub title: String,
    pub kind: ElementType,
    pub value: JsonValue,
    pub section: Option<String>,
    pub disabled: bool,
    pub changed: bool,
    pub options: Vec<ElementOption>,
    pub blocked: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangedElement {
    pub id: String,
    pub title: String,
    pub old: JsonValue,
    pub new: JsonValue,
}

#[derive(Debug, Default)]
pub struct PanelState {
    pub config: PanelConfig,
    pub elements: Vec<RuntimeElement>,
    /// Snapshot the `updated` payload mode and change highlighting compare to.
    pub initial: Map<String, JsonValue>,
    pub data: PanelData,
    pub env: HookEnv,
    pub cache: HookCache,
    pub response: JsonValue,
    /// Structured form of the last request failure.
    pub request_error: JsonValue,
    /// Latest error; each failure overwrites it.
    pub error: Option<String>,
    pub loading: Option<RequestPhase>,
    pub confirming: Option<Pending>,
    pub views: Vec<ElementView>,
    pub locations: Vec<LocationChange>,
    pub published: Vec<(String, JsonValue)>,
    pub variable_refreshes: usize,
}

impl PanelState {
    pub fn new(config: PanelConfig, data: PanelData, env: HookEnv) -> Self {
        let mut st = PanelState {
            config,
            data,
            env,
            ..Default::default()
        };
        st.load_elements(None);
        st.initial = values_by_id(&st.elements);
        st.refresh_views();
        st
    }

    fn set_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(error = %msg, "panel error");
        self.error = Some(msg);
    }

    /// Normalise `elements` (or the config's own) into runtime elements.
    fn load_elements(&mut self, elements: Option<&[Element]>) {
        let source = elements.unwrap_or(&self.config.elements);
        let (rt, errors) = to_runtime_partial(source);
        self.elements = rt;
        if let Some(e) = errors.last() {
            self.set_error(e.to_string());
        }
    }

    pub fn element(&self, uid: &str) -> Option<&RuntimeElement> {
        self.elements.iter().find(|e| e.uid == uid)
    }

    pub fn view(&self, uid: &str) -> Option<&ElementView> {
        self.views.iter().find(|v| v.uid == uid)
    }

    /// Elements whose value differs from the initial snapshot.
    pub fn changed_elements(&self) -> Vec<ChangedElement> {
        self.elements
            .iter()
            .filter(|r| !r.element.kind.is_read_only())
            .filter_map(|r| {
                let old = self
                    .initial
                    .get(&r.element.id)
                    .cloned()
                    .unwrap_or(JsonValue::Null);
                (old != r.element.value).then(|| ChangedElement {
                    id: r.element.id.clone(),
                    title: r.element.display_title().to_string(),
                    old,
                    new: r.element.value.clone(),
                })
            })
            .collect()
    }

    /// Recompute visibility, enablement and options of every element.
    pub fn refresh_views(&mut self) {
        let input = predicate_input(&self.elements, &self.data);
        let mut views = Vec::new();
        let mut last_error: Option<FormError> = None;
        for el in &self.elements {
            let shown = el.is_shown(&input, &self.env, &mut self.cache);
            last_error = shown.error.or(last_error);
            if !shown.value || el.element.hidden == Some(true) {
                continue;
            }
            let disabled = el.is_disabled(&input, &self.env, &mut self.cache);
            last_error = disabled.error.or(last_error);
            let opts = if el.element.kind.has_options() {
                let r = options::resolve(el, &self.data, &input, &self.env, &mut self.cache);
                last_error = r.error.or(last_error);
                r.value
            } else {
                Vec::new()
            };
            let before = self.initial.get(&el.element.id).unwrap_or(&JsonValue::Null);
            views.push(ElementView {
                uid: el.uid.clone(),
                id: el.element.id.clone(),
                title: el.element.display_title().to_string(),
                kind: el.element.kind.clone(),
                value: el.element.value.clone(),
                section: el.element.section.clone(),
                disabled: disabled.value || el.element.kind.is_read_only(),
                changed: before != &el.element.value,
                options: opts,
                blocked: el.blocked.clone(),
            });
        }
        self.views = views;
        if let Some(e) = last_error {
            self.set_error(e.to_string());
        }
    }

    /// Resolve the request of `phase` into a plan. `None` when the phase has
    /// no request configured.
    pub fn plan(&self, phase: RequestPhase) -> crate::error::Result<Option<RequestPlan>> {
        let opts = self.config.request(phase);
        match opts.method {
            RequestMethod::None => Ok(None),
            RequestMethod::Datasource => {
                let body = match (phase, &opts.payload) {
                    (RequestPhase::Initial, Some(stored)) => stored.clone(),
                    (RequestPhase::Initial, None) => json!({}),
                    _ => payload::build(opts, &self.elements, &self.initial, &self.env)?,
                };
                let text = payload::to_json_text(&body, &self.env)?;
                let body = serde_json::from_str(&text).unwrap_or(body);
                Ok(Some(RequestPlan::Datasource {
                    reference: opts.datasource.clone(),
                    payload: body,
                }))
            }
            method => {
                let vars = &self.env.variables;
                let headers = opts
                    .header
                    .iter()
                    .filter(|h| !h.name.trim().is_empty())
                    .map(|h| (vars.replace(&h.name, None, None), vars.replace(&h.value, None, None)))
                    .collect();
                let body = if method.has_body() {
                    let p = payload::build(opts, &self.elements, &self.initial, &self.env)?;
                    payload::encode(opts, &p, &self.env)?
                } else {
                    payload::Body::Empty
                };
                Ok(Some(RequestPlan::Http(HttpRequest {
                    method,
                    url: vars.replace(&opts.url, None, None),
                    headers,
                    body,
                })))
            }
        }
    }

    fn start_request(&mut self, phase: RequestPhase) -> Vec<Effect> {
        match self.plan(phase) {
            Ok(Some(plan)) => {
                info!(phase = phase.as_str(), request = %plan.describe(), "request");
                self.loading = Some(phase);
                vec![Effect::Send { phase, plan }]
            }
            Ok(None) => self.finish(phase, Ok(JsonValue::Null)),
            Err(e) => {
                self.set_error(e.to_string());
                Vec::new()
            }
        }
    }

    fn finish(&mut self, phase: RequestPhase, outcome: Result<JsonValue, RequestFailure>) -> Vec<Effect> {
        self.loading = None;
        let response = match outcome {
            Ok(r) => r,
            Err(failure) => {
                self.request_error = failure.to_json();
                let text = failure.to_string();
                self.set_error(text.clone());
                return vec![Effect::Notify {
                    level: NotifyLevel::Error,
                    text,
                }];
            }
        };
        self.error = None;
        self.request_error = JsonValue::Null;
        self.response = response;
        if phase != RequestPhase::Update && !self.response.is_null() {
            let ids: Vec<&str> = self.elements.iter().map(|e| e.element.id.as_str()).collect();
            let values = values_from_response(&self.response, &ids);
            for el in &mut self.elements {
                if let Some(v) = values.get(&el.element.id) {
                    el.element.value = v.clone();
                }
            }
        }
        let code = self.config.request(phase).code.clone();
        let (effects, initial_set) = self.run_action(phase.hook_kind(), &code);
        if !initial_set {
            self.initial = values_by_id(&self.elements);
        }
        effects
    }

    /// Run an action hook and apply what it asked for. Returns the host
    /// effects and whether the hook replaced the initial snapshot.
    fn run_action(&mut self, kind: HookKind, code: &str) -> (Vec<Effect>, bool) {
        let hook = match Hook::compile(kind, Some(code)) {
            Ok(h) => h,
            Err(e) => {
                self.set_error(e.to_string());
                return (Vec::new(), false);
            }
        };
        if hook.is_default() {
            return (Vec::new(), false);
        }
        let input = ActionInput {
            options: self.config.to_json().unwrap_or(JsonValue::Null),
            data: self.data.to_json(),
            elements: elements_json(&self.elements),
            response: self.response.clone(),
            initial: JsonValue::Object(self.initial.clone()),
            error: self.request_error.clone(),
        };
        match hook.run_action(&input, &self.env) {
            Ok(outcome) => {
                let applied = self.apply_effects(outcome.effects);
                if let Some(message) = outcome.failure {
                    self.set_error(FormError::runtime(kind, message).to_string());
                }
                applied
            }
            Err(e) => {
                self.set_error(e.to_string());
                (Vec::new(), false)
            }
        }
    }

    fn apply_effects(&mut self, effects: Vec<HookEffect>) -> (Vec<Effect>, bool) {
        let mut out = Vec::new();
        let mut initial_set = false;
        for effect in effects {
            match effect {
                HookEffect::ChangeElements(v) => match serde_json::from_value::<Vec<Element>>(v) {
                    Ok(els) => self.load_elements(Some(&els)),
                    Err(e) => self.set_error(format!("onChangeElements: {e}")),
                },
                HookEffect::ChangeOptions(v) => {
                    if let Some(e) = self.merge_options(v) {
                        self.set_error(e);
                    } else {
                        out.push(Effect::PersistConfig(Box::new(self.config.clone())));
                    }
                }
                HookEffect::SetInitial(v) => match v {
                    JsonValue::Object(map) => {
                        self.initial = map;
                        initial_set = true;
                    }
                    other => self.set_error(format!("setInitial expects an object, got {other}")),
                },
                HookEffect::InitialRequest => out.push(Effect::RerunInitial),
                HookEffect::Notify { level, message } => out.push(Effect::Notify { level, text: message }),
                HookEffect::Location(l) => {
                    self.locations.push(l.clone());
                    out.push(Effect::Navigate(l));
                }
                HookEffect::Publish { event, payload } => self.published.push((event, payload)),
                HookEffect::RefreshVariables => self.variable_refreshes += 1,
            }
        }
        (out, initial_set)
    }

    /// Shallow-merge `patch` into the panel options. Returns an error message
    /// when the result is not a valid document.
    fn merge_options(&mut self, patch: JsonValue) -> Option<String> {
        let JsonValue::Object(patch) = patch else {
            return Some("onOptionsChange expects an object".into());
        };
        let mut doc = match self.config.to_json() {
            Ok(JsonValue::Object(m)) => m,
            Ok(_) => Map::new(),
            Err(e) => return Some(e.to_string()),
        };
        let elements_changed = patch.contains_key("elements");
        doc.extend(patch);
        match PanelConfig::from_json(JsonValue::Object(doc)) {
            Ok(cfg) => {
                self.config = cfg;
                if elements_changed {
                    self.load_elements(None);
                }
                None
            }
            Err(e) => Some(e.to_string()),
        }
    }

    /// Park `action` for confirmation when `needed`. Repeating the action
    /// while it is parked counts as confirming it.
    fn hold(&mut self, needed: bool, action: Pending) -> bool {
        if needed && self.confirming != Some(action) {
            self.confirming = Some(action);
            return true;
        }
        self.confirming = None;
        false
    }

    fn reset(&mut self) -> Vec<Effect> {
        match self.config.reset_action.mode {
            ResetActionMode::Initial => {
                self.restore_initial();
                Vec::new()
            }
            ResetActionMode::Custom => {
                let code = self.config.reset_action.code.clone();
                self.run_action(HookKind::ResetCode, &code).0
            }
            ResetActionMode::Datasource => self.start_request(RequestPhase::Reset),
        }
    }

    fn restore_initial(&mut self) {
        for el in &mut self.elements {
            if let Some(v) = self.initial.get(&el.element.id) {
                el.element.value = v.clone();
            }
        }
    }
}

pub fn update(state: &mut PanelState, msg: AppMsg) -> Vec<Effect> {
    use AppMsg::*;
    let effects = match msg {
        Start => state.start_request(RequestPhase::Initial),
        Loaded { phase, outcome } => state.finish(phase, outcome),
        SetValue { uid, value } => {
            let editable = state.view(&uid).is_some_and(|v| !v.disabled && v.blocked.is_none());
            match state.elements.iter_mut().find(|e| e.uid == uid) {
                Some(el) if editable => el.element.value = value,
                Some(_) => {}
                None => state.set_error(FormError::UnknownElement(uid).to_string()),
            }
            Vec::new()
        }
        Submit => {
            if state.hold(state.config.confirm_modal, Pending::Submit) {
                Vec::new()
            } else {
                state.start_request(RequestPhase::Update)
            }
        }
        Confirm(yes) => match state.confirming.take() {
            Some(Pending::Submit) if yes => state.start_request(RequestPhase::Update),
            Some(Pending::Reset) if yes => state.reset(),
            _ => Vec::new(),
        },
        Reset => {
            if state.hold(state.config.reset_action.confirm, Pending::Reset) {
                Vec::new()
            } else {
                state.reset()
            }
        }
        RunButton(uid) => {
            let code = state
                .element(&uid)
                .filter(|e| e.element.kind == ElementType::CustomButton)
                .and_then(|e| e.element.custom_code.clone());
            match code {
                Some(code) => state.run_action(HookKind::CustomButton, &code).0,
                None => Vec::new(),
            }
        }
        ConfigReplaced(cfg) => {
            state.config = cfg;
            state.load_elements(None);
            Vec::new()
        }
        DataChanged(data) => {
            state.data = data;
            Vec::new()
        }
    };
    state.refresh_views();
    effects
}

#[cfg(test)]
mod tests;
