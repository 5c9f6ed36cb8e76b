//! Pure filtering over a [`RunLogs`] tree.
//!
//! A filter compiles its search term up front, so an invalid regex is
//! reported before a single line is scanned. Applying a filter produces a
//! parallel tree of matching entries with byte-offset match positions;
//! steps with no matching entries are omitted. No I/O happens here.

use crate::logs::entry::{LogEntry, LogLevel, RunLogs};
use color_eyre::eyre::{eyre, Result};
use regex::Regex;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterLevel {
    #[default]
    All,
    /// Errors only.
    Errors,
    /// Warnings and errors.
    Warnings,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub level: FilterLevel,
    pub search_term: String,
    pub case_sensitive: bool,
    pub regex: bool,
    /// `-1` means all steps.
    pub step_index: i32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            level: FilterLevel::All,
            search_term: String::new(),
            case_sensitive: false,
            regex: false,
            step_index: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPosition {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct FilteredLogEntry {
    pub original: LogEntry,
    pub original_index: usize,
    pub matches: Vec<MatchPosition>,
}

#[derive(Debug, Clone)]
pub struct FilteredStepLogs {
    pub step_index: usize,
    pub step_name: String,
    pub job_name: String,
    pub entries: Vec<FilteredLogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct FilteredResult {
    pub steps: Vec<FilteredStepLogs>,
}

impl FilteredResult {
    pub fn total_entries(&self) -> usize {
        self.steps.iter().map(|s| s.entries.len()).sum()
    }
}

#[derive(Debug)]
pub struct LogFilter {
    config: FilterConfig,
    regex: Option<Regex>,
}

impl LogFilter {
    /// Compile the filter. Regex errors surface here, synchronously.
    pub fn new(config: FilterConfig) -> Result<Self> {
        let regex = if config.regex && !config.search_term.is_empty() {
            let pattern = if config.case_sensitive {
                config.search_term.clone()
            } else {
                format!("(?i){}", config.search_term)
            };
            Some(Regex::new(&pattern).map_err(|e| eyre!("invalid search pattern: {e}"))?)
        } else {
            None
        };
        Ok(Self { config, regex })
    }

    /// Filter a log tree. Pure and idempotent: applying the same filter to
    /// its own output yields an equal structure.
    pub fn apply(&self, run_logs: &RunLogs) -> FilteredResult {
        let mut result = FilteredResult::default();

        for step in &run_logs.steps {
            if self.config.step_index >= 0 && step.step_index != self.config.step_index as usize {
                continue;
            }

            let mut entries = Vec::new();
            for (original_index, entry) in step.entries.iter().enumerate() {
                if !matches_level(entry.level, self.config.level) {
                    continue;
                }
                let matches = self.find_matches(&entry.content);
                if !self.config.search_term.is_empty() && matches.is_empty() {
                    continue;
                }
                entries.push(FilteredLogEntry {
                    original: entry.clone(),
                    original_index,
                    matches,
                });
            }

            if !entries.is_empty() {
                result.steps.push(FilteredStepLogs {
                    step_index: step.step_index,
                    step_name: step.step_name.clone(),
                    job_name: step.job_name.clone(),
                    entries,
                });
            }
        }

        result
    }

    /// Byte offsets of every occurrence of the search term in `content`.
    /// Empty search terms match nothing.
    pub fn find_matches(&self, content: &str) -> Vec<MatchPosition> {
        if self.config.search_term.is_empty() {
            return Vec::new();
        }

        if let Some(regex) = &self.regex {
            return regex
                .find_iter(content)
                .map(|m| MatchPosition {
                    start: m.start(),
                    end: m.end(),
                })
                .collect();
        }

        // Literal search. Case-insensitive comparison goes through ASCII
        // lowercasing, which preserves byte offsets.
        let (haystack, needle) = if self.config.case_sensitive {
            (content.to_string(), self.config.search_term.clone())
        } else {
            (
                content.to_ascii_lowercase(),
                self.config.search_term.to_ascii_lowercase(),
            )
        };

        let mut matches = Vec::new();
        let mut offset = 0;
        while let Some(pos) = haystack[offset..].find(&needle) {
            let start = offset + pos;
            matches.push(MatchPosition {
                start,
                end: start + needle.len(),
            });
            offset = start + needle.len().max(1);
        }
        matches
    }
}

fn matches_level(level: LogLevel, filter: FilterLevel) -> bool {
    match filter {
        FilterLevel::All => true,
        FilterLevel::Errors => level == LogLevel::Error,
        FilterLevel::Warnings => matches!(level, LogLevel::Warning | LogLevel::Error),
    }
}

/// The named quick filters the UI seeds its filter bar with.
pub fn quick_filters() -> BTreeMap<&'static str, FilterConfig> {
    let mut filters = BTreeMap::new();
    for (name, level) in [
        ("all", FilterLevel::All),
        ("errors", FilterLevel::Errors),
        ("warnings", FilterLevel::Warnings),
    ] {
        filters.insert(
            name,
            FilterConfig {
                level,
                search_term: String::new(),
                case_sensitive: false,
                regex: false,
                step_index: -1,
            },
        );
    }
    filters
}
