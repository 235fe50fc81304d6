use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Element type as stored in the panel document. Unknown names survive a
/// round-trip untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElementType {
    #[default]
    String,
    Number,
    Password,
    Textarea,
    Code,
    Boolean,
    Datetime,
    Slider,
    Radio,
    Select,
    Multiselect,
    File,
    Link,
    CheckboxList,
    Disabled,
    DisabledTextarea,
    CustomButton,
    Unknown(String),
}

impl ElementType {
    pub fn as_str(&self) -> &str {
        match self {
            ElementType::String => "string",
            ElementType::Number => "number",
            ElementType::Password => "password",
            ElementType::Textarea => "textarea",
            ElementType::Code => "code",
            ElementType::Boolean => "boolean",
            ElementType::Datetime => "datetime",
            ElementType::Slider => "slider",
            ElementType::Radio => "radio",
            ElementType::Select => "select",
            ElementType::Multiselect => "multiselect",
            ElementType::File => "file",
            ElementType::Link => "link",
            ElementType::CheckboxList => "checkboxList",
            ElementType::Disabled => "disabled",
            ElementType::DisabledTextarea => "disabledTextarea",
            ElementType::CustomButton => "customButton",
            ElementType::Unknown(s) => s.as_str(),
        }
    }

    /// Choice elements take their selectable values from an options source.
    pub fn has_options(&self) -> bool {
        matches!(
            self,
            ElementType::Radio
                | ElementType::Select
                | ElementType::Multiselect
                | ElementType::CheckboxList
        )
    }

    /// Read-only elements never count as "updated".
    pub fn is_read_only(&self) -> bool {
        matches!(self, ElementType::Disabled | ElementType::DisabledTextarea)
    }

    pub fn allows_custom_value(&self) -> bool {
        matches!(self, ElementType::Select | ElementType::Multiselect)
    }
}

impl From<String> for ElementType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "string" => ElementType::String,
            "number" => ElementType::Number,
            "password" => ElementType::Password,
            "textarea" => ElementType::Textarea,
            "code" => ElementType::Code,
            "boolean" => ElementType::Boolean,
            "datetime" => ElementType::Datetime,
            "slider" => ElementType::Slider,
            "radio" => ElementType::Radio,
            "select" => ElementType::Select,
            "multiselect" => ElementType::Multiselect,
            "file" => ElementType::File,
            "link" => ElementType::Link,
            "checkboxList" => ElementType::CheckboxList,
            "disabled" => ElementType::Disabled,
            "disabledTextarea" => ElementType::DisabledTextarea,
            "customButton" => ElementType::CustomButton,
            _ => ElementType::Unknown(s),
        }
    }
}

impl From<ElementType> for String {
    fn from(t: ElementType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptionsSource {
    #[default]
    Custom,
    Query,
    Code,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementOption {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ElementOption {
    pub fn new(label: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            icon: None,
        }
    }
}

/// Coordinates of a query-backed option list: frame name plus the value and
/// label field names inside it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ElementType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub value: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    // number / slider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    // textarea / code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    // file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
    // link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    // choice elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<ElementOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options_source: Option<OptionsSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_options: Option<QueryOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_custom_value: Option<bool>,
    // behaviour scripts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_if: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_if: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_options: Option<String>,
    // custom button
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Element {
    pub fn new(id: impl Into<String>, kind: ElementType) -> Self {
        Self {
            id: id.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<JsonValue>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn options_source(&self) -> OptionsSource {
        self.options_source.unwrap_or_default()
    }

    /// Identity key used for the (id, type) uniqueness invariant.
    pub fn key(&self) -> (&str, &ElementType) {
        (self.id.as_str(), &self.kind)
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    #[default]
    All,
    Updated,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestMethod {
    #[default]
    #[serde(rename = "-")]
    None,
    #[serde(rename = "datasource")]
    Datasource,
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "PUT")]
    Put,
    #[serde(rename = "PATCH")]
    Patch,
    #[serde(rename = "DELETE")]
    Delete,
}

impl RequestMethod {
    pub fn has_body(self) -> bool {
        matches!(
            self,
            RequestMethod::Post | RequestMethod::Put | RequestMethod::Patch
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestMethod::None => "-",
            RequestMethod::Datasource => "datasource",
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Delete => "DELETE",
        }
    }
}

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_MULTIPART: &str = "multipart/form-data";

fn default_content_type() -> String {
    CONTENT_TYPE_JSON.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default)]
    pub method: RequestMethod,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datasource: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<Header>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub get_payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_mode: Option<PayloadMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_only: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: RequestMethod::None,
            url: String::new(),
            datasource: String::new(),
            content_type: default_content_type(),
            header: Vec::new(),
            code: String::new(),
            get_payload: String::new(),
            payload: None,
            payload_mode: None,
            updated_only: None,
            extra: Map::new(),
        }
    }
}

impl RequestOptions {
    /// Payload mode with the pre-migration `updatedOnly` flag honoured.
    pub fn effective_payload_mode(&self) -> PayloadMode {
        match (self.payload_mode, self.updated_only) {
            (Some(mode), _) => mode,
            (None, Some(true)) => PayloadMode::Updated,
            (None, _) => PayloadMode::All,
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type
            .to_ascii_lowercase()
            .starts_with(CONTENT_TYPE_MULTIPART)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetActionMode {
    Custom,
    #[default]
    Initial,
    Datasource,
}

/// What the reset button does; `code` is the hook run in `custom` mode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetActionOptions {
    #[serde(default)]
    pub mode: ResetActionMode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    #[serde(default)]
    pub confirm: bool,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonGroupOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub orientation: String,
    #[serde(default)]
    pub submit: ButtonOptions,
    #[serde(default)]
    pub reset: ButtonOptions,
    #[serde(default)]
    pub save: ButtonOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutVariant {
    #[default]
    Single,
    Split,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayoutSection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayoutOptions {
    #[serde(default)]
    pub variant: LayoutVariant,
    #[serde(default)]
    pub sections: Vec<LayoutSection>,
}

/// The three request phases of a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestPhase {
    Initial,
    Update,
    Reset,
}

impl RequestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestPhase::Initial => "initial",
            RequestPhase::Update => "update",
            RequestPhase::Reset => "reset",
        }
    }

    pub fn hook_kind(self) -> crate::error::HookKind {
        match self {
            RequestPhase::Initial => crate::error::HookKind::InitialCode,
            RequestPhase::Update => crate::error::HookKind::UpdateCode,
            RequestPhase::Reset => crate::error::HookKind::ResetCode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig {
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub layout: LayoutOptions,
    #[serde(default)]
    pub initial: RequestOptions,
    #[serde(default)]
    pub update: RequestOptions,
    #[serde(default)]
    pub reset: RequestOptions,
    #[serde(default)]
    pub reset_action: ResetActionOptions,
    #[serde(default)]
    pub button_group: ButtonGroupOptions,
    #[serde(default)]
    pub confirm_modal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl PanelConfig {
    pub fn from_json(v: JsonValue) -> crate::error::Result<Self> {
        serde_json::from_value(v).map_err(|e| crate::error::FormError::json("panel document", e))
    }

    pub fn to_json(&self) -> crate::error::Result<JsonValue> {
        serde_json::to_value(self).map_err(|e| crate::error::FormError::json("panel document", e))
    }

    pub fn request(&self, phase: RequestPhase) -> &RequestOptions {
        match phase {
            RequestPhase::Initial => &self.initial,
            RequestPhase::Update => &self.update,
            RequestPhase::Reset => &self.reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn element_type_round_trips_wire_names() {
        let v = json!({"id": "a", "type": "checkboxList"});
        let el: Element = serde_json::from_value(v).unwrap();
        assert_eq!(el.kind, ElementType::CheckboxList);
        let back = serde_json::to_value(&el).unwrap();
        assert_eq!(back["type"], "checkboxList");
    }

    #[test]
    fn unknown_element_type_and_fields_survive() {
        let v = json!({"id": "a", "type": "colorPicker", "palette": ["red"], "value": 1});
        let el: Element = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(el.kind, ElementType::Unknown("colorPicker".into()));
        assert_eq!(el.extra.get("palette"), Some(&json!(["red"])));
        assert_eq!(serde_json::to_value(&el).unwrap(), v);
    }

    #[test]
    fn reset_action_keeps_code_and_unknown_keys() {
        let v = json!({
            "mode": "custom",
            "code": "context.grafana.notifySuccess('reset')",
            "confirm": true,
            "icon": "history"
        });
        let ra: ResetActionOptions = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(ra.mode, ResetActionMode::Custom);
        assert_eq!(ra.code, "context.grafana.notifySuccess('reset')");
        assert!(ra.confirm);
        assert_eq!(serde_json::to_value(&ra).unwrap(), v);
    }

    #[test]
    fn untitled_elements_persist_without_title() {
        let el = Element::new("a", ElementType::String);
        let back = serde_json::to_value(&el).unwrap();
        assert!(back.get("title").is_none());
    }

    #[test]
    fn legacy_updated_only_maps_to_payload_mode() {
        let mut r = RequestOptions {
            updated_only: Some(true),
            ..Default::default()
        };
        assert_eq!(r.effective_payload_mode(), PayloadMode::Updated);
        r.updated_only = Some(false);
        assert_eq!(r.effective_payload_mode(), PayloadMode::All);
        r.payload_mode = Some(PayloadMode::Custom);
        assert_eq!(r.effective_payload_mode(), PayloadMode::Custom);
    }

    #[test]
    fn panel_config_defaults_fill_missing_sections() {
        let cfg = PanelConfig::from_json(json!({
            "elements": [{"id": "name", "type": "string", "title": "Name"}],
            "update": {"method": "POST", "url": "http://x", "payloadMode": "updated"}
        }))
        .unwrap();
        assert_eq!(cfg.elements.len(), 1);
        assert_eq!(cfg.initial.method, RequestMethod::None);
        assert_eq!(cfg.update.method, RequestMethod::Post);
        assert_eq!(cfg.update.content_type, CONTENT_TYPE_JSON);
        assert_eq!(cfg.update.effective_payload_mode(), PayloadMode::Updated);
        assert_eq!(cfg.reset_action.mode, ResetActionMode::Initial);
    }
}
