//! Discovery of dispatchable workflows.
//!
//! Scans `.github/workflows/` and keeps files whose `on` trigger includes
//! `workflow_dispatch`, surfacing their typed input declarations. The `on`
//! key needs care twice over: its value may be a string, a sequence, or a
//! mapping, and some YAML parsers resolve a bare `on` key to boolean true.

use color_eyre::eyre::{eyre, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

const WORKFLOWS_DIR: &str = ".github/workflows";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    #[default]
    String,
    Boolean,
    Choice,
    Environment,
    Number,
}

impl InputType {
    pub fn as_str(self) -> &'static str {
        match self {
            InputType::String => "string",
            InputType::Boolean => "boolean",
            InputType::Choice => "choice",
            InputType::Environment => "environment",
            InputType::Number => "number",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowInput {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, deserialize_with = "de_default_scalar")]
    pub default: Option<String>,
    #[serde(rename = "type", default)]
    pub input_type: InputType,
    #[serde(default)]
    pub options: Vec<String>,
}

/// A dispatchable workflow as discovered on disk. Immutable for the
/// process lifetime.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub filename: String,
    pub name: String,
    pub inputs: BTreeMap<String, WorkflowInput>,
}

/// Workflow defaults may be written as bare scalars (`default: 3`,
/// `default: true`); render them all as strings.
fn de_default_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| scalar_to_string(&v)))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse one workflow document. Returns `Ok(None)` when the workflow has no
/// `workflow_dispatch` trigger.
pub fn parse(filename: &str, data: &str) -> Result<Option<WorkflowFile>> {
    let doc: Value = serde_yaml::from_str(data)
        .map_err(|e| eyre!("failed to parse workflow {filename}: {e}"))?;
    let Value::Mapping(root) = &doc else {
        return Ok(None);
    };

    let name = root
        .get(Value::from("name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    // A bare `on:` key is resolved to boolean true by YAML 1.1 parsers.
    let trigger = root
        .get(Value::from("on"))
        .or_else(|| root.get(Value::from(true)));
    let Some(trigger) = trigger else {
        return Ok(None);
    };

    let Some(dispatch) = workflow_dispatch_value(trigger) else {
        return Ok(None);
    };

    let mut inputs = BTreeMap::new();
    if let Some(Value::Mapping(input_map)) = dispatch.get(Value::from("inputs")) {
        for (key, value) in input_map {
            let Some(input_name) = key.as_str() else {
                continue;
            };
            let input: WorkflowInput = serde_yaml::from_value(value.clone())
                .map_err(|e| eyre!("bad input {input_name:?} in {filename}: {e}"))?;
            inputs.insert(input_name.to_string(), input);
        }
    }

    Ok(Some(WorkflowFile {
        filename: filename.to_string(),
        name,
        inputs,
    }))
}

/// The `on` value may be a scalar (`on: workflow_dispatch`), a sequence
/// (`on: [push, workflow_dispatch]`), or a mapping. Returns the dispatch
/// configuration mapping (empty for the scalar and sequence forms).
fn workflow_dispatch_value(trigger: &Value) -> Option<Value> {
    match trigger {
        Value::String(s) if s == "workflow_dispatch" => Some(Value::Mapping(Default::default())),
        Value::Sequence(items) => items
            .iter()
            .any(|item| item.as_str() == Some("workflow_dispatch"))
            .then(|| Value::Mapping(Default::default())),
        Value::Mapping(map) => map.get(Value::from("workflow_dispatch")).map(|v| {
            if v.is_mapping() {
                v.clone()
            } else {
                Value::Mapping(Default::default())
            }
        }),
        _ => None,
    }
}

/// Scan a repository for dispatchable workflows, sorted by filename.
pub fn discover(repo_root: &Path) -> Result<Vec<WorkflowFile>> {
    let dir = repo_root.join(WORKFLOWS_DIR);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(Vec::new()), // no workflows directory
    };

    let mut workflows = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if ext != "yml" && ext != "yaml" {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let data = std::fs::read_to_string(&path)
            .map_err(|e| eyre!("failed to read {}: {e}", path.display()))?;
        match parse(filename, &data) {
            Ok(Some(workflow)) => workflows.push(workflow),
            Ok(None) => {}
            Err(e) => tracing::warn!(file = filename, error = %e, "skipping unparseable workflow"),
        }
    }

    workflows.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(workflows)
}
