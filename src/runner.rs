//! Workflow dispatch and run-id resolution.
//!
//! `gh workflow run` does not report the id of the run it created, so the
//! runner records the wall-clock instant before dispatching and then polls
//! the latest-run endpoint until a run created at or after that instant
//! appears. The slack absorbs clock skew between this machine and GitHub.

use crate::exec::CommandExecutor;
use crate::github::ActionsClient;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const CREATED_AT_SLACK_SECS: i64 = 2;

/// One workflow dispatch request.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub workflow: String,
    pub branch: String,
    pub inputs: BTreeMap<String, String>,
    pub watch: bool,
}

#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error("failed to dispatch {workflow}: {stderr}")]
    DispatchFailed { workflow: String, stderr: String },
    #[error("no new run for {workflow} appeared within {waited_secs}s")]
    ResolutionTimeout { workflow: String, waited_secs: u64 },
    #[error("failed to resolve run for {workflow}: {reason}")]
    Lookup { workflow: String, reason: String },
}

pub struct Runner {
    executor: Arc<dyn CommandExecutor>,
    resolve_timeout: Duration,
    poll_interval: Duration,
}

impl Runner {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Shrink the resolution window; tests use millisecond budgets.
    pub fn with_resolution(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.resolve_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Assemble and run `gh workflow run <file> [--ref <branch>] [-f k=v ...]`.
    /// Inputs with empty values are omitted so declared defaults survive.
    pub async fn execute(&self, cfg: &RunConfig) -> Result<(), RunnerError> {
        let args = dispatch_args(cfg);
        let result = self.executor.execute("gh", &args).await;
        if let Some(error) = result.error {
            let stderr = result.stderr.trim();
            let stderr = if stderr.is_empty() {
                error
            } else {
                format!("{error} ({stderr})")
            };
            return Err(RunnerError::DispatchFailed {
                workflow: cfg.workflow.clone(),
                stderr,
            });
        }
        Ok(())
    }

    /// Dispatch and resolve the id of the run the dispatch created.
    pub async fn execute_and_get_run_id(
        &self,
        cfg: &RunConfig,
        client: &dyn ActionsClient,
    ) -> Result<i64, RunnerError> {
        let dispatched_at = Utc::now();
        self.execute(cfg).await?;

        let cutoff = dispatched_at - ChronoDuration::seconds(CREATED_AT_SLACK_SECS);
        let deadline = tokio::time::Instant::now() + self.resolve_timeout;
        let mut last_error: Option<String> = None;

        loop {
            match client.get_latest_run(&cfg.workflow, &cfg.branch).await {
                Ok(run) if run.created_at >= cutoff => return Ok(run.id),
                Ok(_) => {}
                Err(e) => last_error = Some(format!("{e}")),
            }

            if tokio::time::Instant::now() + self.poll_interval > deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        match last_error {
            Some(reason) => Err(RunnerError::Lookup {
                workflow: cfg.workflow.clone(),
                reason,
            }),
            None => Err(RunnerError::ResolutionTimeout {
                workflow: cfg.workflow.clone(),
                waited_secs: self.resolve_timeout.as_secs(),
            }),
        }
    }
}

fn dispatch_args(cfg: &RunConfig) -> Vec<String> {
    let mut args = vec![
        "workflow".to_string(),
        "run".to_string(),
        cfg.workflow.clone(),
    ];
    if !cfg.branch.is_empty() {
        args.push("--ref".to_string());
        args.push(cfg.branch.clone());
    }
    for (key, value) in &cfg.inputs {
        if value.is_empty() {
            continue;
        }
        args.push("-f".to_string());
        args.push(format!("{key}={value}"));
    }
    args
}
