//! Log records and per-line parsing.
//!
//! GitHub job logs arrive as plain text with optional leading ISO
//! timestamps and Actions command markers (`##[error]`, `##[group]`, ...).
//! Each line becomes a [`LogEntry`] with a best-effort timestamp and an
//! inferred severity. The severity table is part of the contract.

use crate::github::{Conclusion, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub level: LogLevel,
}

/// Logs for a single step of a single job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogs {
    pub step_index: usize,
    pub workflow: String,
    pub run_id: i64,
    pub job_name: String,
    pub step_name: String,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The full log tree for a run or chain, steps ordered by
/// (job order, step number) with dense `step_index` values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunLogs {
    pub chain_name: String,
    pub branch: String,
    pub steps: Vec<StepLogs>,
}

impl RunLogs {
    pub fn new(chain_name: &str, branch: &str) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            branch: branch.to_string(),
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: StepLogs) {
        self.steps.push(step);
    }

    pub fn total_entries(&self) -> usize {
        self.steps.iter().map(|s| s.entries.len()).sum()
    }
}

/// Parse raw log text into entries. `fetched_at` is the fallback timestamp
/// for lines without a parseable leading timestamp.
pub fn parse_log_output(raw: &str, fetched_at: DateTime<Utc>) -> Vec<LogEntry> {
    raw.lines()
        .map(|line| LogEntry {
            timestamp: leading_timestamp(line).unwrap_or(fetched_at),
            content: line.to_string(),
            level: detect_level(line),
        })
        .collect()
}

/// Severity mapping:
/// `##[error]` or a leading `ERROR` / `FAILED` token means error,
/// `##[warning]` or leading `WARN` / `WARNING` means warning,
/// leading `DEBUG` / `TRACE` means debug, everything else info.
/// Leading tokens are matched case-insensitively with an optional colon,
/// after any timestamp prefix.
pub fn detect_level(line: &str) -> LogLevel {
    if line.contains("##[error]") {
        return LogLevel::Error;
    }
    if line.contains("##[warning]") {
        return LogLevel::Warning;
    }

    let token = strip_timestamp_prefix(line)
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(':')
        .to_ascii_uppercase();
    match token.as_str() {
        "ERROR" | "FAILED" => LogLevel::Error,
        "WARN" | "WARNING" => LogLevel::Warning,
        "DEBUG" | "TRACE" => LogLevel::Debug,
        _ => LogLevel::Info,
    }
}

fn strip_timestamp_prefix(line: &str) -> &str {
    if let Some((first, rest)) = line.split_once(char::is_whitespace) {
        if DateTime::parse_from_rfc3339(first).is_ok() {
            return rest;
        }
    }
    line
}

fn leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let first = line.split_whitespace().next()?;
    DateTime::parse_from_rfc3339(first)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
