//! Datasource registry and query execution.
//!
//! Each entry names a datasource, its stable uid and either a command line
//! whose stdout is the JSON response, or a canned response. The query payload
//! reaches the command through `DYNAFORM_PAYLOAD`.

use crate::engine::migration::DatasourceRegistry;
use crate::services::frames::is_yaml;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasourceEntry {
    pub name: String,
    pub uid: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct Datasources {
    entries: Vec<DatasourceEntry>,
}

impl Datasources {
    pub fn new(entries: Vec<DatasourceEntry>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading datasources {}", path.display()))?;
        let entries: Vec<DatasourceEntry> = if is_yaml(path) {
            serde_yaml::from_str(&s).with_context(|| format!("parsing {}", path.display()))?
        } else {
            serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))?
        };
        Ok(Self { entries })
    }

    /// Find by uid first, then by name, so documents not yet migrated still
    /// resolve.
    pub fn find(&self, reference: &str) -> Option<&DatasourceEntry> {
        self.entries
            .iter()
            .find(|d| d.uid == reference)
            .or_else(|| self.entries.iter().find(|d| d.name == reference))
    }

    /// Run a query against `reference` and return the raw response.
    pub fn query(&self, reference: &str, payload: &JsonValue) -> Result<JsonValue> {
        let ds = self
            .find(reference)
            .ok_or_else(|| anyhow!("Datasource '{reference}' not found"))?;
        info!(datasource = %ds.uid, "datasource query");
        if let Some(resp) = &ds.response {
            return Ok(resp.clone());
        }
        if ds.command.trim().is_empty() {
            return Err(anyhow!("Datasource '{}' has no command", ds.name));
        }
        run_cmdline_to_json(&ds.command, &[
            ("DYNAFORM_PAYLOAD", payload.to_string()),
            ("DYNAFORM_DATASOURCE", ds.uid.clone()),
        ])
    }
}

impl DatasourceRegistry for Datasources {
    fn uid_for_name(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.uid.clone())
    }

    fn has_uid(&self, uid: &str) -> bool {
        self.entries.iter().any(|d| d.uid == uid)
    }
}

fn env_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Z0-9_]+)\}").unwrap_or_else(|e| panic!("env pattern: {e}"))
    })
}

/// Expand `${VAR}` from the environment; unset variables expand to nothing.
/// Values with whitespace are quoted so they stay one argument.
pub fn expand_cmdline_env(cmdline: &str) -> String {
    let env_map: HashMap<String, String> = env::vars().collect();
    env_pattern()
        .replace_all(cmdline, |caps: &regex::Captures| {
            let v = env_map.get(&caps[1]).cloned().unwrap_or_default();
            if v.chars().any(|c| c.is_whitespace()) {
                format!("\"{}\"", v.replace('"', "\\\""))
            } else {
                v
            }
        })
        .to_string()
}

pub fn run_cmdline_to_json(cmdline: &str, envs: &[(&str, String)]) -> Result<JsonValue> {
    let expanded = expand_cmdline_env(cmdline);
    let parts = shlex::split(&expanded).ok_or_else(|| anyhow!("Failed to parse command line"))?;
    let Some((program, args)) = parts.split_first() else {
        return Err(anyhow!("Empty command line"));
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let output = cmd
        .output()
        .with_context(|| format!("spawning {expanded}"))?;
    if !output.status.success() {
        let err = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(anyhow!("Command failed: {}\n{}", cmdline, err));
    }
    let text = String::from_utf8_lossy(&output.stdout).to_string();
    serde_json::from_str(&text).with_context(|| "parsing command JSON")
}
