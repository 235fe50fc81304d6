//! Embedded JavaScript execution for user hooks.
//!
//! Every invocation builds a fresh `boa_engine` context holding only the
//! prelude and the context object of its hook family. Host calls go through a
//! single native function, `__dynaform_native(name, argsJson)`, backed by a
//! thread-local [`Bridge`]; values cross the boundary as JSON text.

use super::context::{
    notification_text, normalize_query_response, ActionOutcome, HookEffect, HookEnv,
    LocationChange, NotifyLevel,
};
use crate::engine::files::FileRef;
use crate::error::{FormError, HookKind, Result};
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsResult, JsString, JsValue, NativeFunction, Source};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::cell::RefCell;
use tracing::{debug, warn};

/// Which context object a hook receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// `showIf`, `disableIf`, `getOptions`.
    Predicate,
    /// Lifecycle and custom-button code.
    Action,
    /// Custom payload code.
    Payload,
}

impl Shape {
    pub fn for_hook(kind: HookKind) -> Shape {
        match kind {
            HookKind::ShowIf | HookKind::DisableIf | HookKind::GetOptions => Shape::Predicate,
            HookKind::GetPayload => Shape::Payload,
            _ => Shape::Action,
        }
    }

    fn is_async(self) -> bool {
        !matches!(self, Shape::Predicate)
    }

    fn context_js(self) -> &'static str {
        match self {
            Shape::Predicate => PREDICATE_CONTEXT,
            Shape::Action => ACTION_CONTEXT,
            Shape::Payload => PAYLOAD_CONTEXT,
        }
    }
}

const PRELUDE: &str = r#"
var __dynaform = {
  call: function (name) {
    var args = Array.prototype.slice.call(arguments, 1);
    var out = JSON.parse(__dynaform_native(name, JSON.stringify(args)));
    if (out.error !== undefined) { throw new Error(out.error); }
    return out.value;
  },
  effect: function (kind, payload) {
    __dynaform.call('effect', kind, payload === undefined ? null : payload);
  },
  message: function (e) {
    if (e && e.message !== undefined) { return String(e.message); }
    return String(e);
  },
  plain: function (v) {
    return JSON.stringify(v === undefined ? null : v);
  },
  settle: function (ok, v) {
    try {
      __dynaform.call('settle', ok, v === undefined ? null : v);
    } catch (e) {
      __dynaform.call('settle', false, __dynaform.message(e));
    }
  },
  replaceVariables: function (text, scope, format) {
    return __dynaform.call('replaceVariables', text, scope, format);
  },
  fileToBase64: function (file) {
    return new Promise(function (resolve, reject) {
      try { resolve(__dynaform.call('fileToBase64', file)); } catch (e) { reject(e); }
    });
  }
};
"#;

const PREDICATE_CONTEXT: &str = r#"
var context = {
  panel: { elements: __input.elements, data: __input.data },
  grafana: { replaceVariables: __dynaform.replaceVariables }
};
"#;

const ACTION_CONTEXT: &str = r#"
var context = {
  panel: {
    options: __input.options,
    data: __input.data,
    elements: __input.elements,
    response: __input.response,
    initial: __input.initial,
    error: __input.error,
    onChangeElements: function (elements) { __dynaform.effect('changeElements', elements); },
    onOptionsChange: function (options) { __dynaform.effect('changeOptions', options); },
    setInitial: function (values) { __dynaform.effect('setInitial', values); },
    initialRequest: function () { __dynaform.effect('initialRequest'); return Promise.resolve(); }
  },
  grafana: {
    replaceVariables: __dynaform.replaceVariables,
    notifySuccess: function (m) { __dynaform.effect('notifySuccess', m); },
    notifyWarning: function (m) { __dynaform.effect('notifyWarning', m); },
    notifyError: function (m) { __dynaform.effect('notifyError', m); },
    locationService: {
      push: function (path) { __dynaform.effect('locationPush', String(path)); },
      partial: function (query, replace) {
        __dynaform.effect('locationPartial', { query: query, replace: !!replace });
      },
      reload: function () { __dynaform.effect('locationReload'); }
    },
    templateService: {
      refresh: function () { __dynaform.effect('refreshVariables'); },
      getVariables: function () { return __dynaform.call('getVariables'); }
    },
    eventBus: {
      publish: function (event, payload) {
        var name = typeof event === 'string' ? event : (event && event.type) || String(event);
        __dynaform.effect('publish', { event: name, payload: payload === undefined ? null : payload });
      }
    }
  },
  utils: {
    toDataQueryResponse: function (r) { return __dynaform.call('toDataQueryResponse', r); },
    fileToBase64: __dynaform.fileToBase64
  }
};
"#;

const PAYLOAD_CONTEXT: &str = r#"
var context = {
  panel: { elements: __input.elements, initial: __input.initial },
  utils: { fileToBase64: __dynaform.fileToBase64 }
};
"#;

enum Settled {
    Value(JsonValue),
    Error(String),
}

/// Host side of one invocation.
struct Bridge {
    hook: HookKind,
    env: HookEnv,
    allow_effects: bool,
    effects: Vec<HookEffect>,
    settled: Option<Settled>,
}

thread_local! {
    static BRIDGE: RefCell<Option<Bridge>> = const { RefCell::new(None) };
}

/// Removes the bridge when the invocation ends, also on early return.
struct BridgeGuard;

impl BridgeGuard {
    fn install(bridge: Bridge) -> BridgeGuard {
        BRIDGE.with(|b| *b.borrow_mut() = Some(bridge));
        BridgeGuard
    }

    fn take(self) -> Option<Bridge> {
        BRIDGE.with(|b| b.borrow_mut().take())
    }
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        BRIDGE.with(|b| b.borrow_mut().take());
    }
}

impl Bridge {
    fn call(&mut self, name: &str, args: &[JsonValue]) -> std::result::Result<JsonValue, String> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(JsonValue::Null);
        match name {
            "replaceVariables" => {
                let text = match arg(0) {
                    JsonValue::String(s) => s,
                    JsonValue::Null => String::new(),
                    other => other.to_string(),
                };
                let scope = args.get(1).and_then(|s| s.as_object());
                let format = args.get(2).and_then(|f| f.as_str());
                Ok(JsonValue::String(self.env.variables.replace(&text, scope, format)))
            }
            "getVariables" => Ok(self.env.variables.to_json()),
            "toDataQueryResponse" => Ok(normalize_query_response(&arg(0))),
            "fileToBase64" => {
                let mut file = FileRef::from_value(&arg(0))
                    .ok_or_else(|| "fileToBase64 expects a file handle".to_string())?;
                if let (true, Some(root)) = (file.path.is_relative(), &self.env.file_root) {
                    file.path = root.join(&file.path);
                }
                file.to_base64().map(JsonValue::String).map_err(|e| e.to_string())
            }
            "effect" => {
                let kind = arg(0);
                let kind = kind.as_str().unwrap_or_default();
                if !self.allow_effects {
                    return Err(format!("{kind} is not available in {}", self.hook));
                }
                let effect = effect_from(kind, arg(1))
                    .ok_or_else(|| format!("unknown panel effect '{kind}'"))?;
                debug!(hook = %self.hook, ?effect, "hook effect");
                self.effects.push(effect);
                Ok(JsonValue::Null)
            }
            "settle" => {
                let settled = if arg(0).as_bool().unwrap_or(false) {
                    Settled::Value(arg(1))
                } else {
                    Settled::Error(notification_text(&arg(1)))
                };
                self.settled = Some(settled);
                Ok(JsonValue::Null)
            }
            other => Err(format!("unknown host function '{other}'")),
        }
    }
}

fn effect_from(kind: &str, payload: JsonValue) -> Option<HookEffect> {
    let notify = |level| HookEffect::Notify {
        level,
        message: notification_text(&payload),
    };
    Some(match kind {
        "changeElements" => HookEffect::ChangeElements(payload),
        "changeOptions" => HookEffect::ChangeOptions(payload),
        "setInitial" => HookEffect::SetInitial(payload),
        "initialRequest" => HookEffect::InitialRequest,
        "notifySuccess" => notify(NotifyLevel::Success),
        "notifyWarning" => notify(NotifyLevel::Warning),
        "notifyError" => notify(NotifyLevel::Error),
        "locationPush" => {
            HookEffect::Location(LocationChange::Push(payload.as_str()?.to_string()))
        }
        "locationPartial" => HookEffect::Location(LocationChange::Partial {
            query: payload.get("query").cloned().unwrap_or(JsonValue::Null),
            replace: payload.get("replace").and_then(|r| r.as_bool()).unwrap_or(false),
        }),
        "locationReload" => HookEffect::Location(LocationChange::Reload),
        "publish" => HookEffect::Publish {
            event: payload.get("event")?.as_str()?.to_string(),
            payload: payload.get("payload").cloned().unwrap_or(JsonValue::Null),
        },
        "refreshVariables" => HookEffect::RefreshVariables,
        _ => return None,
    })
}

fn arg_string(arg: Option<&JsValue>, context: &mut Context) -> JsResult<String> {
    match arg {
        Some(v) => Ok(v.to_string(context)?.to_std_string_escaped()),
        None => Ok(String::new()),
    }
}

fn native_dispatch(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let name = arg_string(args.first(), context)?;
    let raw = arg_string(args.get(1), context)?;
    let params: Vec<JsonValue> = serde_json::from_str(&raw).unwrap_or_default();
    let reply = BRIDGE.with(|b| match b.borrow_mut().as_mut() {
        Some(bridge) => bridge.call(&name, &params),
        None => Err("host bridge is not installed".to_string()),
    });
    let out = match reply {
        Ok(value) => json!({ "value": value }),
        Err(error) => json!({ "error": error }),
    };
    Ok(JsValue::from(JsString::from(out.to_string().as_str())))
}

fn new_context() -> std::result::Result<Context, String> {
    let mut context = Context::default();
    let native = NativeFunction::from_fn_ptr(native_dispatch);
    context
        .register_global_property(
            js_string!("__dynaform_native"),
            native.to_js_function(context.realm()),
            Attribute::all(),
        )
        .map_err(|e| e.to_string())?;
    context
        .eval(Source::from_bytes(PRELUDE.as_bytes()))
        .map_err(|e| e.to_string())?;
    Ok(context)
}

fn wrap(body: &str, is_async: bool) -> String {
    let keyword = if is_async { "async function" } else { "function" };
    format!("var __hook = ({keyword} (context) {{\n{body}\n}});")
}

/// Embed JSON as a JS expression without going through the JS lexer twice.
fn json_literal<T: Serialize>(value: &T) -> String {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "null".into());
    let quoted = serde_json::to_string(&text).unwrap_or_else(|_| "\"null\"".into());
    format!("JSON.parse({quoted})")
}

/// Fail with `ScriptCompile` when `body` is not a valid hook body.
pub fn check_syntax(hook: HookKind, body: &str) -> Result<()> {
    let mut context = new_context().map_err(|e| FormError::compile(hook, e))?;
    let source = wrap(body, Shape::for_hook(hook).is_async());
    context
        .eval(Source::from_bytes(source.as_bytes()))
        .map(|_| ())
        .map_err(|e| {
            warn!(%hook, error = %e, "hook does not compile");
            FormError::compile(hook, e.to_string())
        })
}

struct Prepared {
    context: Context,
    guard: BridgeGuard,
}

fn prepare<T: Serialize>(
    hook: HookKind,
    body: &str,
    input: &T,
    env: &HookEnv,
) -> Result<Prepared> {
    let shape = Shape::for_hook(hook);
    let guard = BridgeGuard::install(Bridge {
        hook,
        env: env.clone(),
        allow_effects: shape == Shape::Action,
        effects: Vec::new(),
        settled: None,
    });
    let mut context = new_context().map_err(|e| FormError::runtime(hook, e))?;
    let setup = format!("var __input = {};\n{}", json_literal(input), shape.context_js());
    context
        .eval(Source::from_bytes(setup.as_bytes()))
        .map_err(|e| FormError::runtime(hook, e.to_string()))?;
    context
        .eval(Source::from_bytes(wrap(body, shape.is_async()).as_bytes()))
        .map_err(|e| FormError::compile(hook, e.to_string()))?;
    Ok(Prepared { context, guard })
}

/// Run a synchronous predicate hook and return its JSON-converted result.
pub fn eval_sync<T: Serialize>(
    hook: HookKind,
    body: &str,
    input: &T,
    env: &HookEnv,
) -> Result<JsonValue> {
    let Prepared { mut context, guard } = prepare(hook, body, input, env)?;
    let out = context
        .eval(Source::from_bytes(b"__dynaform.plain(__hook(context))"))
        .map_err(|e| FormError::runtime(hook, e.to_string()))?;
    let text = out
        .to_string(&mut context)
        .map_err(|e| FormError::runtime(hook, e.to_string()))?
        .to_std_string_escaped();
    drop(guard);
    serde_json::from_str(&text).map_err(|e| FormError::runtime(hook, e.to_string()))
}

/// Run an async hook to completion, draining the job queue, and collect the
/// effects it requested.
pub fn eval_async<T: Serialize>(
    hook: HookKind,
    body: &str,
    input: &T,
    env: &HookEnv,
) -> Result<ActionOutcome> {
    let Prepared { mut context, guard } = prepare(hook, body, input, env)?;
    context
        .eval(Source::from_bytes(
            b"__hook(context).then(function (v) { __dynaform.settle(true, v); }, \
              function (e) { __dynaform.settle(false, __dynaform.message(e)); });",
        ))
        .map_err(|e| FormError::runtime(hook, e.to_string()))?;
    let _ = context.run_jobs();
    let bridge = guard
        .take()
        .ok_or_else(|| FormError::runtime(hook, "host bridge was lost"))?;
    match bridge.settled {
        Some(Settled::Value(value)) => Ok(ActionOutcome {
            value,
            effects: bridge.effects,
            failure: None,
        }),
        Some(Settled::Error(message)) => Ok(ActionOutcome {
            value: JsonValue::Null,
            effects: bridge.effects,
            failure: Some(message),
        }),
        None => Err(FormError::runtime(hook, "hook never settled")),
    }
}

#[cfg(test)]
mod engine_tests;
