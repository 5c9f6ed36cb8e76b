//! TTL'd on-disk cache of completed run logs.
//!
//! One JSON record per `(chain_name, run_id)` under the per-user cache
//! directory, written temp-then-rename. The cache is advisory: a miss or a
//! corrupt record always falls back to the fetcher.

use crate::logs::entry::RunLogs;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Terminal runs change never; active runs change constantly.
pub const TTL_TERMINAL: Duration = Duration::from_secs(60 * 60);
pub const TTL_ACTIVE: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct CachedRunLogs {
    run_logs: RunLogs,
    stored_at: DateTime<Utc>,
    ttl_secs: u64,
}

impl CachedRunLogs {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age.num_seconds() < 0 || age.num_seconds() as u64 >= self.ttl_secs
    }
}

pub struct LogCache {
    dir: PathBuf,
}

impl LogCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Ensure the cache directory exists. Safe to call repeatedly.
    pub fn load(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| eyre!("failed to create cache dir {}: {e}", self.dir.display()))?;
        Ok(())
    }

    pub fn put(
        &self,
        chain_name: &str,
        run_id: i64,
        run_logs: &RunLogs,
        ttl: Duration,
    ) -> Result<()> {
        self.load()?;
        let record = CachedRunLogs {
            run_logs: run_logs.clone(),
            stored_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        };
        let path = self.path_for(chain_name, run_id);
        let data = serde_json::to_vec_pretty(&record)?;
        write_atomic(&path, &data)
    }

    /// Fetch a cached record, deleting it if it has expired.
    pub fn get(&self, chain_name: &str, run_id: i64) -> Option<RunLogs> {
        let path = self.path_for(chain_name, run_id);
        let data = std::fs::read(&path).ok()?;
        let record: CachedRunLogs = match serde_json::from_slice(&data) {
            Ok(record) => record,
            Err(_) => {
                // Corrupt record: drop it and treat as a miss.
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };
        if record.is_expired(Utc::now()) {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        Some(record.run_logs)
    }

    /// Sweep every expired or unreadable record.
    pub fn clear(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()), // nothing cached yet
        };
        let now = Utc::now();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = std::fs::read(&path)
                .ok()
                .and_then(|data| serde_json::from_slice::<CachedRunLogs>(&data).ok())
                .is_none_or(|record| record.is_expired(now));
            if expired {
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    fn path_for(&self, chain_name: &str, run_id: i64) -> PathBuf {
        let chain = sanitize(chain_name);
        self.dir.join(format!("{chain}-{run_id}.json"))
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "run".to_string()
    } else {
        cleaned
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(|e| eyre!("failed to write {}: {e}", tmp.display()))?;
    std::fs::rename(&tmp, path).map_err(|e| eyre!("failed to replace {}: {e}", path.display()))?;
    Ok(())
}
