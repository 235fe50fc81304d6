use super::*;
use crate::engine::variables::Variables;
use crate::sandbox::context::{ActionInput, PayloadInput, PredicateInput};
use serde_json::json;

fn env() -> HookEnv {
    HookEnv::new(Variables::new().with("host", "db1"))
}

fn predicate_input() -> PredicateInput {
    PredicateInput {
        elements: json!([{"id": "mode", "type": "select", "value": "advanced"}]),
        data: json!({"series": []}),
    }
}

#[test]
fn syntax_errors_are_compile_errors() {
    assert!(check_syntax(HookKind::ShowIf, "return true;").is_ok());
    let err = check_syntax(HookKind::ShowIf, "return (;").unwrap_err();
    assert!(matches!(err, FormError::ScriptCompile { hook: HookKind::ShowIf, .. }));
}

#[test]
fn await_only_compiles_in_action_hooks() {
    assert!(check_syntax(HookKind::UpdateCode, "await Promise.resolve(1);").is_ok());
    assert!(check_syntax(HookKind::ShowIf, "await Promise.resolve(1);").is_err());
}

#[test]
fn predicate_reads_elements_and_variables() {
    let body = "const mode = context.panel.elements.find((e) => e.id === 'mode');\n\
                return mode.value === 'advanced' && context.grafana.replaceVariables('$host') === 'db1';";
    let out = eval_sync(HookKind::ShowIf, body, &predicate_input(), &env()).unwrap();
    assert_eq!(out, json!(true));
}

#[test]
fn predicate_without_return_yields_null() {
    let out = eval_sync(HookKind::ShowIf, "const x = 1;", &predicate_input(), &env()).unwrap();
    assert_eq!(out, JsonValue::Null);
}

#[test]
fn predicate_throw_is_runtime_error() {
    let err = eval_sync(HookKind::DisableIf, "throw new Error('boom');", &predicate_input(), &env())
        .unwrap_err();
    assert!(matches!(err, FormError::ScriptRuntime { hook: HookKind::DisableIf, .. }));
}

#[test]
fn predicate_context_has_no_mutators() {
    let err = eval_sync(
        HookKind::ShowIf,
        "context.panel.onChangeElements([]); return true;",
        &predicate_input(),
        &env(),
    )
    .unwrap_err();
    assert!(matches!(err, FormError::ScriptRuntime { .. }));
}

#[test]
fn action_hook_records_effects_in_order() {
    let input = ActionInput {
        elements: json!([{"id": "name", "type": "string", "value": "a"}]),
        response: json!({"ok": true}),
        ..Default::default()
    };
    let body = r#"
        const els = context.panel.elements.map((e) => ({ ...e, value: 'b' }));
        context.panel.onChangeElements(els);
        context.grafana.notifySuccess(['Saved', 'all good']);
        context.grafana.locationService.partial({ tab: 2 }, true);
        context.grafana.eventBus.publish({ type: 'refresh' }, { id: 1 });
        await context.panel.initialRequest();
        return context.panel.response.ok;
    "#;
    let out = eval_async(HookKind::UpdateCode, body, &input, &env()).unwrap();
    assert_eq!(out.value, json!(true));
    assert_eq!(
        out.effects,
        vec![
            HookEffect::ChangeElements(json!([{"id": "name", "type": "string", "value": "b"}])),
            HookEffect::Notify {
                level: NotifyLevel::Success,
                message: "Saved: all good".into()
            },
            HookEffect::Location(LocationChange::Partial {
                query: json!({"tab": 2}),
                replace: true
            }),
            HookEffect::Publish {
                event: "refresh".into(),
                payload: json!({"id": 1})
            },
            HookEffect::InitialRequest,
        ]
    );
}

#[test]
fn action_hook_rejection_carries_message() {
    let out = eval_async(
        HookKind::ResetCode,
        "await Promise.resolve(); throw new Error('nope');",
        &ActionInput::default(),
        &env(),
    )
    .unwrap();
    assert_eq!(out.failure.as_deref(), Some("nope"));
    assert_eq!(out.value, JsonValue::Null);
    assert!(out.effects.is_empty());
}

#[test]
fn effects_before_a_throw_are_kept() {
    let out = eval_async(
        HookKind::CustomButton,
        "context.grafana.notifySuccess('half'); await Promise.resolve(); throw new Error('late');",
        &ActionInput::default(),
        &env(),
    )
    .unwrap();
    assert_eq!(out.failure.as_deref(), Some("late"));
    assert_eq!(
        out.effects,
        vec![HookEffect::Notify {
            level: NotifyLevel::Success,
            message: "half".into(),
        }]
    );
}

#[test]
fn action_hook_normalizes_query_responses() {
    let input = ActionInput {
        response: json!({"results": {"A": {"frames": [{"fields": [{"name": "v", "values": [1]}]}]}}}),
        ..Default::default()
    };
    let body = "return context.utils.toDataQueryResponse(context.panel.response).data[0].refId;";
    let out = eval_async(HookKind::InitialCode, body, &input, &env()).unwrap();
    assert_eq!(out.value, json!("A"));
}

#[test]
fn payload_hook_encodes_files() {
    let path = std::env::temp_dir().join(format!("dynaform-sandbox-{}.txt", std::process::id()));
    std::fs::write(&path, b"hello").unwrap();
    let input = PayloadInput {
        elements: json!([{"id": "doc", "type": "file",
            "value": [{"name": "a.txt", "path": path.to_string_lossy()}]}]),
        initial: json!({}),
    };
    let body = r#"
        const file = context.panel.elements[0].value[0];
        return { doc: await context.utils.fileToBase64(file) };
    "#;
    let out = eval_async(HookKind::GetPayload, body, &input, &env()).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(out.value, json!({"doc": "aGVsbG8="}));
    assert!(out.effects.is_empty());
}

#[test]
fn bridge_is_removed_after_each_call() {
    let _ = eval_sync(HookKind::ShowIf, "return 1;", &predicate_input(), &env());
    assert!(BRIDGE.with(|b| b.borrow().is_none()));
}
