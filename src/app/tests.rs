use super::*;
use crate::engine::payload::Body;
use crate::engine::Variables;
use serde_json::json;

fn fields() -> Vec<Element> {
    vec![
        Element::new("name", ElementType::String).with_value("alice"),
        Element::new("age", ElementType::Number).with_value(30),
    ]
}

fn panel(config: PanelConfig) -> PanelState {
    PanelState::new(config, PanelData::default(), HookEnv::default())
}

fn uid_of(st: &PanelState, id: &str) -> String {
    st.elements
        .iter()
        .find(|e| e.id() == id)
        .map(|e| e.uid.clone())
        .unwrap()
}

fn value_of(st: &PanelState, id: &str) -> JsonValue {
    st.elements
        .iter()
        .find(|e| e.id() == id)
        .map(|e| e.element.value.clone())
        .unwrap()
}

#[test]
fn initial_hook_runs_before_snapshot_without_request() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.initial.code = "context.panel.onChangeElements(context.panel.elements.map(function (e) {\
        return e.id === 'name' ? Object.assign({}, e, {value: 'bob'}) : e; }));"
        .into();
    let mut st = panel(cfg);
    let name_uid = uid_of(&st, "name");

    let effects = update(&mut st, AppMsg::Start);
    assert!(effects.is_empty());
    assert_eq!(value_of(&st, "name"), json!("bob"));
    // uids survive a script round-trip
    assert_eq!(uid_of(&st, "name"), name_uid);
    assert_eq!(st.initial.get("name"), Some(&json!("bob")));
    assert!(st.changed_elements().is_empty());
    assert!(st.error.is_none());
}

#[test]
fn initial_response_populates_values() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.initial.method = RequestMethod::Get;
    cfg.initial.url = "http://$host/profile".into();
    let env = HookEnv::new(Variables::new().with("host", "api.local"));
    let mut st = PanelState::new(cfg, PanelData::default(), env);

    let effects = update(&mut st, AppMsg::Start);
    match effects.as_slice() {
        [Effect::Send {
            phase: RequestPhase::Initial,
            plan: RequestPlan::Http(req),
        }] => {
            assert_eq!(req.url, "http://api.local/profile");
            assert_eq!(req.body, Body::Empty);
        }
        other => panic!("expected one initial send, got {other:?}"),
    }
    assert_eq!(st.loading, Some(RequestPhase::Initial));

    let _ = update(
        &mut st,
        AppMsg::Loaded {
            phase: RequestPhase::Initial,
            outcome: Ok(json!({"name": "carol", "age": 41})),
        },
    );
    assert!(st.loading.is_none());
    assert_eq!(value_of(&st, "name"), json!("carol"));
    assert_eq!(st.initial.get("age"), Some(&json!(41)));
    assert!(st.views.iter().all(|v| !v.changed));
}

#[test]
fn update_sends_changed_values_and_records_failure() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.update.method = RequestMethod::Post;
    cfg.update.url = "http://api.local/profile".into();
    cfg.update.payload_mode = Some(crate::model::PayloadMode::Updated);
    let mut st = panel(cfg);
    let age = uid_of(&st, "age");

    let _ = update(&mut st, AppMsg::SetValue { uid: age.clone(), value: json!(31) });
    assert!(st.view(&age).unwrap().changed);
    let changed = st.changed_elements();
    assert_eq!(changed.len(), 1);
    assert_eq!((changed[0].old.clone(), changed[0].new.clone()), (json!(30), json!(31)));

    let effects = update(&mut st, AppMsg::Submit);
    match effects.as_slice() {
        [Effect::Send {
            plan: RequestPlan::Http(req),
            ..
        }] => assert_eq!(req.body, Body::Json(r#"{"age":31}"#.into())),
        other => panic!("expected update send, got {other:?}"),
    }

    let effects = update(
        &mut st,
        AppMsg::Loaded {
            phase: RequestPhase::Update,
            outcome: Err(RequestFailure {
                message: "Forbidden".into(),
                status: Some(403),
            }),
        },
    );
    assert_eq!(
        effects,
        vec![Effect::Notify {
            level: NotifyLevel::Error,
            text: "Forbidden (HTTP 403)".into(),
        }]
    );
    assert_eq!(st.error.as_deref(), Some("Forbidden (HTTP 403)"));
    assert_eq!(st.request_error["status"], json!(403));
    // snapshot untouched after a failed update
    assert_eq!(st.initial.get("age"), Some(&json!(30)));
}

#[test]
fn confirm_modal_gates_submit() {
    let mut cfg = PanelConfig {
        elements: fields(),
        confirm_modal: true,
        ..Default::default()
    };
    cfg.update.method = RequestMethod::Put;
    let mut st = panel(cfg);

    assert!(update(&mut st, AppMsg::Submit).is_empty());
    assert_eq!(st.confirming, Some(Pending::Submit));
    assert!(update(&mut st, AppMsg::Confirm(false)).is_empty());
    assert_eq!(st.confirming, None);

    let _ = update(&mut st, AppMsg::Submit);
    let effects = update(&mut st, AppMsg::Confirm(true));
    assert!(matches!(
        effects.as_slice(),
        [Effect::Send {
            phase: RequestPhase::Update,
            ..
        }]
    ));
    // a stray confirmation does nothing
    assert!(update(&mut st, AppMsg::Confirm(true)).is_empty());
}

#[test]
fn reset_restores_initial_snapshot() {
    let mut st = panel(PanelConfig {
        elements: fields(),
        ..Default::default()
    });
    let name = uid_of(&st, "name");
    let _ = update(&mut st, AppMsg::SetValue { uid: name.clone(), value: json!("zed") });
    assert!(st.view(&name).unwrap().changed);

    let _ = update(&mut st, AppMsg::Reset);
    assert_eq!(value_of(&st, "name"), json!("alice"));
    assert!(!st.view(&name).unwrap().changed);
}

#[test]
fn custom_reset_runs_reset_code() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.reset_action.mode = ResetActionMode::Custom;
    cfg.reset_action.code = "context.grafana.notifyWarning('reset done')".into();
    cfg.reset.code = "context.grafana.notifyError('wrong hook')".into();
    let mut st = panel(cfg);
    assert_eq!(
        update(&mut st, AppMsg::Reset),
        vec![Effect::Notify {
            level: NotifyLevel::Warning,
            text: "reset done".into(),
        }]
    );
}

#[test]
fn reset_confirmation_gates_reset_action() {
    let cfg = PanelConfig::from_json(json!({
        "elements": [{"id": "name", "type": "string", "value": "alice"}],
        "resetAction": {
            "mode": "custom",
            "code": "context.grafana.notifySuccess('reset')",
            "confirm": true
        }
    }))
    .unwrap();
    let mut st = panel(cfg);

    assert!(update(&mut st, AppMsg::Reset).is_empty());
    assert_eq!(st.confirming, Some(Pending::Reset));
    assert!(update(&mut st, AppMsg::Confirm(false)).is_empty());
    assert_eq!(st.confirming, None);

    let _ = update(&mut st, AppMsg::Reset);
    assert_eq!(
        update(&mut st, AppMsg::Confirm(true)),
        vec![Effect::Notify {
            level: NotifyLevel::Success,
            text: "reset".into(),
        }]
    );
    assert_eq!(st.confirming, None);
}

#[test]
fn datasource_reset_sends_reset_plan() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.reset_action.mode = ResetActionMode::Datasource;
    cfg.reset.method = RequestMethod::Datasource;
    cfg.reset.datasource = "ds1".into();
    let mut st = panel(cfg);
    let effects = update(&mut st, AppMsg::Reset);
    assert!(matches!(
        effects.as_slice(),
        [Effect::Send {
            phase: RequestPhase::Reset,
            plan: RequestPlan::Datasource { .. },
        }]
    ));
}

#[test]
fn throwing_show_if_keeps_element_visible() {
    let mut els = fields();
    els[0].show_if = Some("throw new Error('boom')".into());
    let st = panel(PanelConfig {
        elements: els,
        ..Default::default()
    });
    assert_eq!(st.views.len(), 2);
    assert!(st.error.as_deref().unwrap_or_default().contains("boom"));
}

#[test]
fn predicates_hide_and_disable() {
    let mut els = fields();
    els[0].show_if = Some(
        "return context.panel.elements.find(function (e) { return e.id === 'age'; }).value > 18"
            .into(),
    );
    els[1].disable_if = Some("return true".into());
    let mut st = panel(PanelConfig {
        elements: els,
        ..Default::default()
    });
    let age = uid_of(&st, "age");
    assert_eq!(st.views.len(), 2);
    assert!(st.view(&age).unwrap().disabled);

    // disabled elements ignore edits
    let _ = update(&mut st, AppMsg::SetValue { uid: age.clone(), value: json!(5) });
    assert_eq!(value_of(&st, "age"), json!(30));

    let edited = st.elements.iter().map(|e| e.to_persisted()).map(|mut e| {
        if e.id == "age" {
            e.value = json!(12);
            e.disable_if = None;
        }
        e
    });
    let cfg = PanelConfig {
        elements: edited.collect(),
        ..Default::default()
    };
    let _ = update(&mut st, AppMsg::ConfigReplaced(cfg));
    assert_eq!(st.views.len(), 1);
    assert_eq!(st.views[0].id, "age");
}

#[test]
fn uncompilable_script_blocks_its_element() {
    let mut els = fields();
    els[1].disable_if = Some("return (((".into());
    let mut st = panel(PanelConfig {
        elements: els,
        ..Default::default()
    });
    let age = uid_of(&st, "age");
    let view = st.view(&age).unwrap();
    assert!(view.blocked.is_some());
    assert!(st.error.is_some());
    let _ = update(&mut st, AppMsg::SetValue { uid: age, value: json!(1) });
    assert_eq!(value_of(&st, "age"), json!(30));
}

#[test]
fn custom_button_effects_come_back_in_order() {
    let mut button = Element::new("go", ElementType::CustomButton);
    button.custom_code = Some(
        "context.grafana.notifySuccess(['Saved', 'ok']);\
         context.grafana.locationService.push('/d/abc');\
         context.grafana.eventBus.publish('saved', {id: 1});\
         context.grafana.templateService.refresh();"
            .into(),
    );
    let mut st = panel(PanelConfig {
        elements: vec![button],
        ..Default::default()
    });
    let uid = uid_of(&st, "go");
    let effects = update(&mut st, AppMsg::RunButton(uid));
    assert_eq!(
        effects,
        vec![
            Effect::Notify {
                level: NotifyLevel::Success,
                text: "Saved: ok".into(),
            },
            Effect::Navigate(LocationChange::Push("/d/abc".into())),
        ]
    );
    assert_eq!(st.locations.len(), 1);
    assert_eq!(st.published, vec![("saved".to_string(), json!({"id": 1}))]);
    assert_eq!(st.variable_refreshes, 1);
}

#[test]
fn update_hook_can_replace_snapshot() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.update.method = RequestMethod::Post;
    cfg.update.code = "context.panel.setInitial({name: context.panel.response.saved})".into();
    let mut st = panel(cfg);
    let _ = update(
        &mut st,
        AppMsg::Loaded {
            phase: RequestPhase::Update,
            outcome: Ok(json!({"saved": "x"})),
        },
    );
    assert_eq!(st.initial, json!({"name": "x"}).as_object().unwrap().clone());
    assert_eq!(st.response, json!({"saved": "x"}));
}

#[test]
fn options_change_is_persisted_and_initial_request_reruns() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.initial.code = "context.panel.onOptionsChange({confirmModal: true})".into();
    let mut st = panel(cfg);
    let effects = update(&mut st, AppMsg::Start);
    assert!(st.config.confirm_modal);
    match effects.as_slice() {
        [Effect::PersistConfig(c)] => assert!(c.confirm_modal),
        other => panic!("expected persist, got {other:?}"),
    }

    let mut button = Element::new("again", ElementType::CustomButton);
    button.custom_code = Some("return context.panel.initialRequest()".into());
    let mut st = panel(PanelConfig {
        elements: vec![button],
        ..Default::default()
    });
    let uid = uid_of(&st, "again");
    assert_eq!(
        update(&mut st, AppMsg::RunButton(uid)),
        vec![Effect::RerunInitial]
    );
}

#[test]
fn datasource_initial_uses_stored_payload() {
    let mut cfg = PanelConfig {
        elements: fields(),
        ..Default::default()
    };
    cfg.initial.method = RequestMethod::Datasource;
    cfg.initial.datasource = "ds1".into();
    cfg.initial.payload = Some(json!({"target": "$host"}));
    let env = HookEnv::new(Variables::new().with("host", "db1"));
    let st = PanelState::new(cfg, PanelData::default(), env);
    assert_eq!(
        st.plan(RequestPhase::Initial).unwrap(),
        Some(RequestPlan::Datasource {
            reference: "ds1".into(),
            payload: json!({"target": "db1"}),
        })
    );
    assert_eq!(st.plan(RequestPhase::Update).unwrap(), None);
}

#[test]
fn effects_requested_before_a_throw_still_apply() {
    let mut btn = Element::new("save", ElementType::CustomButton);
    btn.custom_code = Some("context.grafana.notifySuccess('saved draft'); throw new Error('then broke');".into());
    let mut st = panel(PanelConfig {
        elements: vec![btn],
        ..Default::default()
    });
    let uid = uid_of(&st, "save");
    assert_eq!(
        update(&mut st, AppMsg::RunButton(uid)),
        vec![Effect::Notify {
            level: NotifyLevel::Success,
            text: "saved draft".into(),
        }]
    );
    assert_eq!(st.error.as_deref(), Some("custom button code failed: then broke"));
}

#[test]
fn hook_errors_overwrite_the_error_slot() {
    let mut a = Element::new("a", ElementType::CustomButton);
    a.custom_code = Some("throw new Error('first')".into());
    let mut b = Element::new("b", ElementType::CustomButton);
    b.custom_code = Some("throw new Error('second')".into());
    let mut st = panel(PanelConfig {
        elements: vec![a, b],
        ..Default::default()
    });
    let (ua, ub) = (uid_of(&st, "a"), uid_of(&st, "b"));
    let _ = update(&mut st, AppMsg::RunButton(ua));
    assert!(st.error.as_deref().unwrap_or_default().contains("first"));
    let _ = update(&mut st, AppMsg::RunButton(ub));
    let err = st.error.clone().unwrap_or_default();
    assert!(err.contains("second") && !err.contains("first"));

    // a successful load clears it
    let _ = update(
        &mut st,
        AppMsg::Loaded {
            phase: RequestPhase::Update,
            outcome: Ok(JsonValue::Null),
        },
    );
    assert!(st.error.is_none());
}
