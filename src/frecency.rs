//! Frecency-ranked run history.
//!
//! A single JSON document under the per-user state directory, keyed by
//! repository. Entries combine a run counter with a recency weight so that
//! recent-and-frequent selections float to the top of future pickers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{eyre, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Workflow,
    Chain,
}

/// The recorded outcome of one chain step, kept so a chain can be resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStepResult {
    pub workflow: String,
    pub run_id: i64,
    pub status: String,
    pub conclusion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub workflow: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    pub branch: String,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_results: Option<Vec<ChainStepResult>>,
    pub run_count: u32,
    pub last_run_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Two entries describe the same selection when everything except the
    /// counters matches.
    fn same_key(&self, other: &Self) -> bool {
        self.entry_type == other.entry_type
            && self.workflow == other.workflow
            && self.chain_name == other.chain_name
            && self.branch == other.branch
            && self.inputs == other.inputs
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    pub entries: HashMap<String, Vec<HistoryEntry>>,
}

/// `run_count` weighted by age: 4x inside the hour, 2x inside a day,
/// 1x inside a week, 0.5x beyond.
pub fn score(entry: &HistoryEntry) -> f64 {
    score_at(entry, Utc::now())
}

fn score_at(entry: &HistoryEntry, now: DateTime<Utc>) -> f64 {
    let hours = now.signed_duration_since(entry.last_run_at).num_minutes() as f64 / 60.0;
    let recency = if hours < 1.0 {
        4.0
    } else if hours < 24.0 {
        2.0
    } else if hours < 168.0 {
        1.0
    } else {
        0.5
    };
    f64::from(entry.run_count) * recency
}

/// Sort descending by score. Stable, so equal scores keep insertion order.
pub fn sort_by_frecency(entries: &mut [HistoryEntry]) {
    let now = Utc::now();
    entries.sort_by(|a, b| {
        score_at(b, now)
            .partial_cmp(&score_at(a, now))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Keep entries for the given workflow file; empty filter keeps everything.
pub fn filter_by_workflow(entries: Vec<HistoryEntry>, workflow: &str) -> Vec<HistoryEntry> {
    if workflow.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|e| e.workflow == workflow)
        .collect()
}

pub struct FrecencyStore {
    path: PathBuf,
    store: Store,
}

impl FrecencyStore {
    /// Load the store, falling back to empty on a missing file or a schema
    /// mismatch. History is a convenience; it must never block startup.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let store = std::fs::read(&path)
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())
            .unwrap_or_default();
        Self { path, store }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a run: merge into the matching entry, bumping its counter and
    /// timestamp, or append a new one.
    pub fn record(&mut self, repo: &str, mut entry: HistoryEntry) {
        entry.run_count = entry.run_count.max(1);
        entry.last_run_at = Utc::now();
        let entries = self.store.entries.entry(repo.to_string()).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| e.same_key(&entry)) {
            existing.run_count += 1;
            existing.last_run_at = entry.last_run_at;
            existing.step_results = entry.step_results;
        } else {
            entries.push(entry);
        }
    }

    /// The top `k` entries for a repository by frecency score, optionally
    /// restricted to one workflow file.
    pub fn top_for_repo(&self, repo: &str, workflow_filter: &str, k: usize) -> Vec<HistoryEntry> {
        let entries = self
            .store
            .entries
            .get(repo)
            .cloned()
            .unwrap_or_default();
        let mut entries = filter_by_workflow(entries, workflow_filter);
        sort_by_frecency(&mut entries);
        entries.truncate(k);
        entries
    }

    /// Atomically replace the file: write to a temp sibling, then rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| eyre!("failed to create {}: {e}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(&self.store)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &data).map_err(|e| eyre!("failed to write {}: {e}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| eyre!("failed to replace {}: {e}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn workflow_entry(workflow: &str, branch: &str) -> HistoryEntry {
        HistoryEntry {
            entry_type: EntryType::Workflow,
            workflow: workflow.to_string(),
            chain_name: None,
            branch: branch.to_string(),
            inputs: HashMap::new(),
            step_results: None,
            run_count: 1,
            last_run_at: Utc::now(),
        }
    }

    fn entry_aged(workflow: &str, run_count: u32, age: Duration) -> HistoryEntry {
        let mut entry = workflow_entry(workflow, "main");
        entry.run_count = run_count;
        entry.last_run_at = Utc::now() - age;
        entry
    }

    #[test]
    fn score_weights_by_recency_band() {
        assert_eq!(score(&entry_aged("a", 1, Duration::minutes(30))), 4.0);
        assert_eq!(score(&entry_aged("a", 1, Duration::hours(5))), 2.0);
        assert_eq!(score(&entry_aged("a", 1, Duration::days(3))), 1.0);
        assert_eq!(score(&entry_aged("a", 1, Duration::days(30))), 0.5);
    }

    #[test]
    fn score_scales_with_run_count() {
        assert_eq!(score(&entry_aged("a", 10, Duration::minutes(5))), 40.0);
    }

    #[test]
    fn score_positive_iff_run_count_positive() {
        assert_eq!(score(&entry_aged("a", 0, Duration::minutes(5))), 0.0);
        for count in [1, 2, 100] {
            for age in [Duration::minutes(1), Duration::days(365)] {
                assert!(score(&entry_aged("a", count, age)) > 0.0);
            }
        }
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut entries = vec![
            entry_aged("old-frequent", 3, Duration::days(30)), // 1.5
            entry_aged("recent", 1, Duration::minutes(5)),     // 4.0
            entry_aged("tie-a", 2, Duration::hours(2)),        // 4.0
            entry_aged("tie-b", 2, Duration::hours(3)),        // 4.0
        ];
        sort_by_frecency(&mut entries);
        assert_eq!(entries[0].workflow, "recent");
        assert_eq!(entries[1].workflow, "tie-a");
        assert_eq!(entries[2].workflow, "tie-b");
        assert_eq!(entries[3].workflow, "old-frequent");
    }

    #[test]
    fn filter_by_workflow_empty_is_passthrough() {
        let entries = vec![workflow_entry("a.yml", "main"), workflow_entry("b.yml", "main")];
        assert_eq!(filter_by_workflow(entries.clone(), "").len(), 2);
        let filtered = filter_by_workflow(entries, "a.yml");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].workflow, "a.yml");
    }

    #[test]
    fn record_twice_increments_run_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FrecencyStore::load(dir.path().join("history.json"));
        store.record("owner/repo", workflow_entry("ci.yml", "main"));
        store.record("owner/repo", workflow_entry("ci.yml", "main"));

        let top = store.top_for_repo("owner/repo", "", 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].run_count, 2);
    }

    #[test]
    fn record_distinguishes_by_inputs_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FrecencyStore::load(dir.path().join("history.json"));
        store.record("owner/repo", workflow_entry("ci.yml", "main"));
        store.record("owner/repo", workflow_entry("ci.yml", "develop"));
        let mut with_inputs = workflow_entry("ci.yml", "main");
        with_inputs
            .inputs
            .insert("env".to_string(), "prod".to_string());
        store.record("owner/repo", with_inputs);

        assert_eq!(store.top_for_repo("owner/repo", "", 10).len(), 3);
    }

    #[test]
    fn record_scopes_by_repo() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FrecencyStore::load(dir.path().join("history.json"));
        store.record("owner/alpha", workflow_entry("ci.yml", "main"));
        store.record("owner/beta", workflow_entry("ci.yml", "main"));

        assert_eq!(store.top_for_repo("owner/alpha", "", 10).len(), 1);
        assert_eq!(store.top_for_repo("owner/beta", "", 10).len(), 1);
        assert!(store.top_for_repo("owner/gamma", "", 10).is_empty());
    }

    #[test]
    fn top_for_repo_limits_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FrecencyStore::load(dir.path().join("history.json"));
        for workflow in ["a.yml", "b.yml", "c.yml"] {
            store.record("owner/repo", workflow_entry(workflow, "main"));
        }
        assert_eq!(store.top_for_repo("owner/repo", "", 2).len(), 2);
        let only_b = store.top_for_repo("owner/repo", "b.yml", 10);
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].workflow, "b.yml");
    }

    #[test]
    fn save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut store = FrecencyStore::load(&path);
        let mut chain_entry = workflow_entry("build.yml", "main");
        chain_entry.entry_type = EntryType::Chain;
        chain_entry.chain_name = Some("release".to_string());
        chain_entry.step_results = Some(vec![ChainStepResult {
            workflow: "build.yml".to_string(),
            run_id: 42,
            status: "completed".to_string(),
            conclusion: "success".to_string(),
        }]);
        store.record("owner/repo", chain_entry);
        store.save().unwrap();

        let reloaded = FrecencyStore::load(&path);
        let top = reloaded.top_for_repo("owner/repo", "", 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].entry_type, EntryType::Chain);
        assert_eq!(top[0].chain_name.as_deref(), Some("release"));
        assert_eq!(top[0].step_results.as_ref().unwrap()[0].run_id, 42);
    }

    #[test]
    fn ill_formed_file_loads_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, b"{\"entries\": \"definitely not a map\"}").unwrap();
        let store = FrecencyStore::load(&path);
        assert!(store.top_for_repo("owner/repo", "", 10).is_empty());

        std::fs::write(&path, b"not json at all").unwrap();
        let store = FrecencyStore::load(&path);
        assert!(store.top_for_repo("owner/repo", "", 10).is_empty());
    }

    #[test]
    fn missing_file_loads_as_empty_store() {
        let store = FrecencyStore::load("/nonexistent/ghd-history.json");
        assert!(store.top_for_repo("owner/repo", "", 10).is_empty());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("history.json");
        let mut store = FrecencyStore::load(&path);
        store.record("owner/repo", workflow_entry("ci.yml", "main"));
        store.save().unwrap();
        assert!(path.exists());
    }
}
