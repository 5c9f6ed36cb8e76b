//! Typed records and a thin adapter over `gh api`.
//!
//! The adapter never retries; callers decide policy. Failures carry the
//! executor error plus captured stderr.

use crate::exec::{argv, CommandExecutor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    #[serde(other)]
    Unknown,
}

impl Conclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Cancelled => "cancelled",
            Conclusion::Skipped => "skipped",
            Conclusion::Unknown => "unknown",
        }
    }

    /// Inverse of [`conclusion_str`]: the empty string means "not concluded".
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" => None,
            "success" => Some(Conclusion::Success),
            "failure" => Some(Conclusion::Failure),
            "cancelled" => Some(Conclusion::Cancelled),
            "skipped" => Some(Conclusion::Skipped),
            _ => Some(Conclusion::Unknown),
        }
    }
}

/// Renders `None` as the empty string, matching what the API reports for
/// runs that have not concluded.
pub fn conclusion_str(conclusion: Option<Conclusion>) -> &'static str {
    conclusion.map_or("", Conclusion::as_str)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub head_branch: String,
}

impl WorkflowRun {
    /// A run is active until it reaches `completed`.
    pub fn is_active(&self) -> bool {
        matches!(self.status, RunStatus::Queued | RunStatus::InProgress)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed && self.conclusion == Some(Conclusion::Success)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
    pub number: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsResponse {
    #[serde(default)]
    pub total_count: i64,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunsResponse {
    #[serde(default)]
    pub total_count: i64,
    pub workflow_runs: Vec<WorkflowRun>,
}

/// The read operations the rest of the core consumes. Implemented by
/// [`GitHubClient`] in production and by table-driven mocks in tests.
#[async_trait]
pub trait ActionsClient: Send + Sync {
    async fn get_workflow_run(&self, run_id: i64) -> Result<WorkflowRun>;
    async fn get_workflow_run_jobs(&self, run_id: i64) -> Result<Vec<Job>>;
    async fn get_latest_run(&self, workflow_file: &str, branch: &str) -> Result<WorkflowRun>;
}

/// Adapter over `gh api`, scoped to a single `owner/repo`.
pub struct GitHubClient {
    executor: Arc<dyn CommandExecutor>,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(executor: Arc<dyn CommandExecutor>, repo_slug: &str) -> Result<Self> {
        let (owner, repo) = repo_slug
            .split_once('/')
            .ok_or_else(|| eyre!("repository must be owner/repo, got {repo_slug:?}"))?;
        if owner.is_empty() || repo.is_empty() {
            return Err(eyre!("repository must be owner/repo, got {repo_slug:?}"));
        }
        Ok(Self {
            executor,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    async fn api(&self, path: &str) -> Result<String> {
        let result = self.executor.execute("gh", &argv(&["api", path])).await;
        result.success_stdout(&format!("gh api {path} failed"))
    }
}

#[async_trait]
impl ActionsClient for GitHubClient {
    async fn get_workflow_run(&self, run_id: i64) -> Result<WorkflowRun> {
        let path = format!("repos/{}/{}/actions/runs/{run_id}", self.owner, self.repo);
        let json = self.api(&path).await?;
        let run: WorkflowRun = serde_json::from_str(&json)
            .map_err(|e| eyre!("failed to decode run {run_id}: {e}"))?;
        Ok(run)
    }

    async fn get_workflow_run_jobs(&self, run_id: i64) -> Result<Vec<Job>> {
        let path = format!(
            "repos/{}/{}/actions/runs/{run_id}/jobs",
            self.owner, self.repo
        );
        let json = self.api(&path).await?;
        let resp: JobsResponse = serde_json::from_str(&json)
            .map_err(|e| eyre!("failed to decode jobs for run {run_id}: {e}"))?;
        Ok(resp.jobs)
    }

    async fn get_latest_run(&self, workflow_file: &str, branch: &str) -> Result<WorkflowRun> {
        let path = format!(
            "repos/{}/{}/actions/workflows/{workflow_file}/runs?branch={branch}&per_page=1",
            self.owner, self.repo
        );
        let json = self.api(&path).await?;
        let resp: RunsResponse = serde_json::from_str(&json)
            .map_err(|e| eyre!("failed to decode runs for {workflow_file}: {e}"))?;
        resp.workflow_runs
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("no runs found for {workflow_file} on {branch}"))
    }
}
