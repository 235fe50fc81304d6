//! File handles held by `file` elements.
//!
//! A picked file is stored in the element value as
//! `{"name": "...", "path": "...", "type": "...", "size": n}`; the bytes stay
//! on disk until a payload or a script asks for them.

use crate::error::{FormError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FileRef {
    /// Build a handle for a file on disk, filling in size and a guessed type.
    pub fn from_path(path: &Path) -> Result<FileRef> {
        let meta = std::fs::metadata(path)
            .map_err(|e| FormError::io(format!("reading {}", path.display()), e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(FileRef {
            mime: guess_mime(&name).map(str::to_string),
            name,
            path: path.to_path_buf(),
            size: Some(meta.len()),
        })
    }

    /// Recognise a handle inside an element value. Both `name` and `path`
    /// must be strings.
    pub fn from_value(v: &JsonValue) -> Option<FileRef> {
        let obj = v.as_object()?;
        if !obj.get("name")?.is_string() || !obj.get("path")?.is_string() {
            return None;
        }
        serde_json::from_value(v.clone()).ok()
    }

    /// Every item of a non-empty array is a file handle.
    pub fn list_from_value(v: &JsonValue) -> Option<Vec<FileRef>> {
        let items = v.as_array()?;
        if items.is_empty() {
            return None;
        }
        items.iter().map(FileRef::from_value).collect()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| FormError::io(format!("reading {}", self.path.display()), e))
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(STANDARD.encode(self.read()?))
    }

    pub fn mime_or_default(&self) -> &str {
        self.mime.as_deref().unwrap_or("application/octet-stream")
    }
}

fn guess_mime(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "json" => "application/json",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognises_handles_and_lists() {
        let one = json!({"name": "a.txt", "path": "/tmp/a.txt", "type": "text/plain"});
        let f = FileRef::from_value(&one).unwrap();
        assert_eq!(f.mime_or_default(), "text/plain");
        assert!(FileRef::from_value(&json!({"name": "a"})).is_none());
        assert!(FileRef::from_value(&json!("a.txt")).is_none());

        assert_eq!(FileRef::list_from_value(&json!([one.clone(), one])).unwrap().len(), 2);
        assert!(FileRef::list_from_value(&json!([])).is_none());
        assert!(FileRef::list_from_value(&json!([{"name": "x", "path": "/p"}, 1])).is_none());
    }

    #[test]
    fn reads_and_encodes_file_contents() {
        let path = std::env::temp_dir().join(format!("dynaform-files-{}.txt", std::process::id()));
        std::fs::write(&path, b"hello").unwrap();
        let f = FileRef::from_path(&path).unwrap();
        assert_eq!(f.size, Some(5));
        assert_eq!(f.mime.as_deref(), Some("text/plain"));
        assert_eq!(f.to_base64().unwrap(), "aGVsbG8=");
        std::fs::remove_file(&path).ok();
    }
}
