use crate::error::{FormError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

/// One named column of a query result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub values: Vec<JsonValue>,
}

/// A query result frame, addressed by `refId` or `name`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl DataFrame {
    pub fn new(ref_id: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            ref_id: Some(ref_id.into()),
            name: None,
            fields,
        }
    }

    pub fn display_name(&self) -> &str {
        self.ref_id
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl Field {
    pub fn new(name: impl Into<String>, values: Vec<JsonValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Current query results of the panel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PanelData {
    #[serde(default)]
    pub series: Vec<DataFrame>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataFile {
    Frames(Vec<DataFrame>),
    Panel(PanelData),
}

impl PanelData {
    pub fn new(series: Vec<DataFrame>) -> Self {
        Self { series }
    }

    pub fn frames(&self) -> impl Iterator<Item = &DataFrame> {
        self.series.iter()
    }

    pub fn frame(&self, name: &str) -> Option<&DataFrame> {
        self.series
            .iter()
            .find(|f| f.ref_id.as_deref() == Some(name))
            .or_else(|| self.series.iter().find(|f| f.name.as_deref() == Some(name)))
    }

    pub fn field(&self, frame: &str, field: &str) -> Option<&Field> {
        self.frame(frame)?.field(field)
    }

    /// Ordered values of `frame.field`, if both resolve.
    pub fn values(&self, frame: &str, field: &str) -> Option<&[JsonValue]> {
        self.field(frame, field).map(|f| f.values.as_slice())
    }

    /// `source:field` pairs for every field of every frame.
    pub fn field_refs(&self) -> Vec<String> {
        self.series
            .iter()
            .flat_map(|frame| {
                frame
                    .fields
                    .iter()
                    .map(move |f| format!("{}:{}", frame.display_name(), f.name))
            })
            .collect()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Load frames from a JSON or YAML file holding either a frame list or
    /// `{series: [...]}`.
    pub fn load(path: &Path) -> Result<PanelData> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| FormError::io(format!("reading {}", path.display()), e))?;
        let parsed: DataFile = if is_yaml(path) {
            serde_yaml::from_str(&s).map_err(|e| FormError::Yaml {
                context: path.display().to_string(),
                source: e,
            })?
        } else {
            serde_json::from_str(&s).map_err(|e| FormError::json(path.display().to_string(), e))?
        };
        Ok(match parsed {
            DataFile::Frames(series) => PanelData { series },
            DataFile::Panel(p) => p,
        })
    }
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> PanelData {
        PanelData::new(vec![
            DataFrame::new(
                "A",
                vec![
                    Field::new("Time", vec![json!(1), json!(2)]),
                    Field::new("Value", vec![json!("x"), json!("y")]),
                ],
            ),
            DataFrame {
                ref_id: None,
                name: Some("B".into()),
                fields: vec![Field::new("Value", vec![json!(10)])],
            },
        ])
    }

    #[test]
    fn looks_up_frames_by_ref_id_or_name() {
        let d = data();
        assert_eq!(d.values("A", "Value").unwrap(), &[json!("x"), json!("y")]);
        assert_eq!(d.values("B", "Value").unwrap(), &[json!(10)]);
        assert!(d.values("A", "Missing").is_none());
        assert!(d.frame("C").is_none());
    }

    #[test]
    fn lists_field_refs() {
        assert_eq!(data().field_refs(), vec!["A:Time", "A:Value", "B:Value"]);
    }

    #[test]
    fn parses_both_file_shapes() {
        let frames: DataFile = serde_json::from_value(json!([{"refId": "A", "fields": []}])).unwrap();
        assert!(matches!(frames, DataFile::Frames(ref v) if v.len() == 1));
        let panel: DataFile =
            serde_json::from_value(json!({"series": [{"name": "B", "fields": []}]})).unwrap();
        assert!(matches!(panel, DataFile::Panel(ref p) if p.series.len() == 1));
    }
}
