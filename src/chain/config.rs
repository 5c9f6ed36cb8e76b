//! Chain configuration: the `.github/chains.yml` document.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const CHAINS_FILE_VERSION: u32 = 2;
const CHAINS_FILE_NAMES: [&str; 2] = [".github/chains.yml", ".github/chains.yaml"];

/// Wait policy for a chain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitFor {
    /// Dispatch and move on immediately.
    #[default]
    None,
    /// Wait until the run leaves `queued`.
    Dispatched,
    /// Wait for completion and require `conclusion == success`.
    Success,
    /// Wait for completion, accept any conclusion.
    Completion,
}

/// Failure policy for a chain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    String,
    Boolean,
    Choice,
}

/// A named variable the user supplies when starting a chain; referenced in
/// step inputs as `{{ var.NAME }}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainStep {
    pub workflow: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub wait_for: WaitFor,
    #[serde(default)]
    pub on_failure: OnFailure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chain {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub steps: Vec<ChainStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainsFile {
    pub version: u32,
    #[serde(default)]
    pub chains: BTreeMap<String, Chain>,
}

/// Parse a chains document, rejecting unsupported versions up front.
pub fn parse_chains(data: &str) -> Result<ChainsFile> {
    let file: ChainsFile =
        serde_yaml::from_str(data).map_err(|e| eyre!("failed to parse chains file: {e}"))?;
    if file.version != CHAINS_FILE_VERSION {
        return Err(eyre!(
            "unsupported chains file version {} (expected {CHAINS_FILE_VERSION})",
            file.version
        ));
    }
    Ok(file)
}

/// Load the chains file from its well-known location under `.github/`.
/// Returns `Ok(None)` when the repository has no chains configured.
pub fn load_chains_file(repo_root: &Path) -> Result<Option<ChainsFile>> {
    for name in CHAINS_FILE_NAMES {
        let path = repo_root.join(name);
        if path.is_file() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| eyre!("failed to read {}: {e}", path.display()))?;
            return parse_chains(&data).map(Some);
        }
    }
    Ok(None)
}
