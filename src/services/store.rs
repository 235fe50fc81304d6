//! File-backed configuration store with get / replace-whole semantics.

use crate::engine::migration::{migrate, DatasourceRegistry, Transform};
use crate::engine::version::CURRENT;
use crate::error::{FormError, Result};
use crate::model::{Element, LayoutSection, PanelConfig};
use crate::services::frames::is_yaml;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    doc: PanelConfig,
    elements: Arc<Vec<Element>>,
    writes: usize,
}

/// Read a document (YAML or JSON by extension) without migrating it.
pub fn read_document(path: &Path) -> Result<JsonValue> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| FormError::io(format!("reading {}", path.display()), e))?;
    if is_yaml(path) {
        serde_yaml::from_str(&s).map_err(|e| FormError::Yaml {
            context: path.display().to_string(),
            source: e,
        })
    } else {
        serde_json::from_str(&s).map_err(|e| FormError::json(path.display().to_string(), e))
    }
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, doc: PanelConfig) -> Self {
        let elements = Arc::new(doc.elements.clone());
        Self {
            path: path.into(),
            doc,
            elements,
            writes: 0,
        }
    }

    /// Load and migrate the document at `path`. Nothing is written back until
    /// the first replace.
    pub fn open(path: &Path, registry: &dyn DatasourceRegistry) -> Result<(Self, Vec<Transform>)> {
        let raw = read_document(path)?;
        let migrated = migrate(raw, None, registry);
        let doc = PanelConfig::from_json(migrated.document)?;
        info!(path = %path.display(), transforms = migrated.applied.len(), "document loaded");
        Ok((Self::new(path, doc), migrated.applied))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &PanelConfig {
        &self.doc
    }

    /// The persisted element array. Its allocation changes on every replace.
    pub fn elements(&self) -> Arc<Vec<Element>> {
        Arc::clone(&self.elements)
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Replace the whole document and write it out, stamped with the current
    /// schema version.
    pub fn replace(&mut self, mut doc: PanelConfig) -> Result<()> {
        doc.version = Some(CURRENT.to_string());
        self.write(&doc)?;
        self.elements = Arc::new(doc.elements.clone());
        self.doc = doc;
        Ok(())
    }

    /// Replace with new elements and sections, keeping the caller's `Arc` as
    /// the persisted array.
    pub fn replace_elements(&mut self, elements: Arc<Vec<Element>>, sections: Vec<LayoutSection>) -> Result<()> {
        let mut doc = self.doc.clone();
        doc.elements = elements.as_ref().clone();
        doc.layout.sections = sections;
        doc.version = Some(CURRENT.to_string());
        self.write(&doc)?;
        self.elements = elements;
        self.doc = doc;
        Ok(())
    }

    fn write(&mut self, doc: &PanelConfig) -> Result<()> {
        let text = if is_yaml(&self.path) {
            serde_yaml::to_string(doc).map_err(|e| FormError::Yaml {
                context: self.path.display().to_string(),
                source: e,
            })?
        } else {
            serde_json::to_string_pretty(doc)
                .map_err(|e| FormError::json(self.path.display().to_string(), e))?
        };
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| FormError::io(format!("writing {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| FormError::io(format!("replacing {}", self.path.display()), e))?;
        self.writes += 1;
        info!(path = %self.path.display(), "document saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::migration::NoDatasources;
    use crate::model::ElementType;
    use serde_json::json;

    fn temp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dynaform-store-{}-{name}", std::process::id()))
    }

    #[test]
    fn open_migrates_and_replace_stamps_version() {
        let path = temp("doc.json");
        std::fs::write(
            &path,
            json!({
                "version": "3.9.0",
                "update": {"method": "POST", "code": "notifySuccess('ok')", "updatedOnly": true},
                "elements": [{"id": "a", "type": "string"}]
            })
            .to_string(),
        )
        .unwrap();
        let (mut store, applied) = ConfigStore::open(&path, &NoDatasources).unwrap();
        assert!(applied.contains(&Transform::NamespaceScripts));
        assert_eq!(store.get().update.code, "context.grafana.notifySuccess('ok')");

        let before = store.elements();
        let doc = store.get().clone();
        store.replace(doc).unwrap();
        assert!(!Arc::ptr_eq(&before, &store.elements()));

        let saved = read_document(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(saved["version"], json!(CURRENT.to_string()));
        assert_eq!(saved["update"]["payloadMode"], "updated");
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn replace_elements_keeps_callers_arc() {
        let path = temp("doc.yaml");
        let mut store = ConfigStore::new(&path, PanelConfig::default());
        let els = Arc::new(vec![Element::new("x", ElementType::Number)]);
        let sections = vec![LayoutSection {
            id: "s".into(),
            name: "S".into(),
        }];
        store.replace_elements(Arc::clone(&els), sections).unwrap();
        assert!(Arc::ptr_eq(&els, &store.elements()));
        let saved = read_document(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(saved["elements"][0]["id"], "x");
        assert_eq!(saved["layout"]["sections"][0]["id"], "s");
    }
}
