//! Log acquisition through the `gh` CLI.
//!
//! Job metadata comes from the API; raw log text comes from
//! `gh run view <id> --log [--job <job-id>]`. A job's text is split into
//! step-sized slices at `##[group]` boundaries and matched positionally
//! against the job's declared steps. A per-job fetch failure still yields a
//! placeholder record per declared step so the view has something to show.

use crate::chain::ChainState;
use crate::exec::{argv, CommandExecutor};
use crate::github::{ActionsClient, Job};
use crate::logs::entry::{parse_log_output, RunLogs, StepLogs};
use chrono::Utc;
use color_eyre::eyre::{eyre, Result};
use std::sync::Arc;

pub struct LogFetcher {
    client: Arc<dyn ActionsClient>,
    executor: Arc<dyn CommandExecutor>,
}

impl LogFetcher {
    pub fn new(client: Arc<dyn ActionsClient>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { client, executor }
    }

    /// Raw log text for every job of a run.
    pub async fn fetch_workflow_logs(&self, run_id: i64) -> Result<String> {
        let args = argv(&["run", "view", &run_id.to_string(), "--log"]);
        let result = self.executor.execute("gh", &args).await;
        result.success_stdout(&format!("failed to fetch logs for run {run_id}"))
    }

    /// Per-step logs for a run, ordered by (job order, step number) with a
    /// dense, monotone `step_index` across jobs.
    pub async fn fetch_step_logs(&self, run_id: i64, workflow: &str) -> Result<Vec<StepLogs>> {
        let jobs = self
            .client
            .get_workflow_run_jobs(run_id)
            .await
            .map_err(|e| eyre!("failed to fetch jobs: {e}"))?;

        let mut all = Vec::new();
        let mut step_index = 0;

        for job in &jobs {
            match self.fetch_job_logs(run_id, job.id).await {
                Ok(raw) => {
                    let steps = split_job_logs(job, &raw, workflow, run_id, step_index);
                    step_index += steps.len();
                    all.extend(steps);
                }
                Err(e) => {
                    // Keep going: other jobs may still have logs.
                    for step in &job.steps {
                        all.push(StepLogs {
                            step_index,
                            workflow: workflow.to_string(),
                            run_id,
                            job_name: job.name.clone(),
                            step_name: step.name.clone(),
                            status: step.status,
                            conclusion: step.conclusion,
                            entries: Vec::new(),
                            fetched_at: Utc::now(),
                            error: Some(format!("{e}")),
                        });
                        step_index += 1;
                    }
                }
            }
        }

        Ok(all)
    }

    /// Assemble the log tree for a chain: one fetch per completed step's
    /// run, with per-step failures recorded rather than raised.
    pub async fn fetch_chain_logs(&self, chain_state: &ChainState, branch: &str) -> RunLogs {
        let mut run_logs = RunLogs::new(&chain_state.chain_name, branch);

        for (idx, result) in &chain_state.step_results {
            match self.fetch_step_logs(result.run_id, &result.workflow).await {
                Ok(steps) => {
                    for mut step in steps {
                        step.step_index = run_logs.steps.len();
                        run_logs.add_step(step);
                    }
                }
                Err(e) => {
                    let step_index = run_logs.steps.len();
                    run_logs.add_step(StepLogs {
                        step_index,
                        workflow: result.workflow.clone(),
                        run_id: result.run_id,
                        job_name: String::new(),
                        step_name: format!("chain step {idx}"),
                        status: result.status,
                        conclusion: result.conclusion,
                        entries: Vec::new(),
                        fetched_at: Utc::now(),
                        error: Some(format!("{e}")),
                    });
                }
            }
        }

        run_logs
    }

    async fn fetch_job_logs(&self, run_id: i64, job_id: i64) -> Result<String> {
        let args = argv(&[
            "run",
            "view",
            &run_id.to_string(),
            "--log",
            "--job",
            &job_id.to_string(),
        ]);
        let result = self.executor.execute("gh", &args).await;
        result.success_stdout(&format!("failed to fetch logs for job {job_id}"))
    }
}

/// Split a job's raw log text at `##[group]` boundaries. The i-th group
/// corresponds to the i-th declared step; when counts disagree, the shorter
/// prefix wins. Group markers belong to their step's lines.
fn split_job_logs(
    job: &Job,
    raw: &str,
    workflow: &str,
    run_id: i64,
    start_index: usize,
) -> Vec<StepLogs> {
    let fetched_at = Utc::now();
    let mut groups: Vec<Vec<&str>> = Vec::new();

    for line in raw.lines() {
        if line.starts_with("##[group]") {
            groups.push(vec![line]);
        } else if let Some(current) = groups.last_mut() {
            current.push(line);
        }
        // Lines before the first group marker belong to no step.
    }

    let count = groups.len().min(job.steps.len());
    groups
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(i, lines)| {
            let step = &job.steps[i];
            StepLogs {
                step_index: start_index + i,
                workflow: workflow.to_string(),
                run_id,
                job_name: job.name.clone(),
                step_name: step.name.clone(),
                status: step.status,
                conclusion: step.conclusion,
                entries: parse_log_output(&lines.join("\n"), fetched_at),
                fetched_at,
                error: None,
            }
        })
        .collect()
}

/// Probe the `gh` CLI: installed, then authenticated. Each failure carries
/// guidance the UI can show verbatim.
pub async fn check_gh_cli_available(executor: &dyn CommandExecutor) -> Result<()> {
    let version = executor.execute("gh", &argv(&["--version"])).await;
    if let Some(err) = version.error {
        return Err(eyre!(
            "gh CLI not found: {err}. Install it from https://cli.github.com"
        ));
    }

    let auth = executor.execute("gh", &argv(&["auth", "status"])).await;
    if let Some(err) = auth.error {
        return Err(eyre!(
            "gh CLI not authenticated: {err}. Run `gh auth login` first"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockExecutor;
    use crate::github::{Conclusion, RunStatus, Step, WorkflowRun};
    use crate::logs::entry::LogLevel;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SUCCESSFUL_RUN_LOG: &str = "\
##[group]Run actions/checkout@v4
Syncing repository: owner/repo
##[endgroup]
##[group]Set up Python 3.11
Successfully installed python-3.11
##[endgroup]
##[group]Install dependencies
Collecting requests
WARNING: pip is out of date
##[endgroup]
##[group]Run tests
4 passed in 1.02s
##[endgroup]";

    const FAILED_RUN_LOG: &str = "\
##[group]Run actions/checkout@v4
Syncing repository
##[endgroup]
##[group]Install dependencies
ERROR: No matching distribution found for nonexistent-package
##[error]Process completed with exit code 1.
##[endgroup]";

    struct JobsClient {
        jobs: Mutex<HashMap<i64, Vec<Job>>>,
    }

    impl JobsClient {
        fn new(jobs: Vec<(i64, Vec<Job>)>) -> Self {
            Self {
                jobs: Mutex::new(jobs.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl ActionsClient for JobsClient {
        async fn get_workflow_run(&self, _run_id: i64) -> Result<WorkflowRun> {
            Err(eyre!("not used"))
        }
        async fn get_workflow_run_jobs(&self, run_id: i64) -> Result<Vec<Job>> {
            self.jobs
                .lock()
                .unwrap()
                .get(&run_id)
                .cloned()
                .ok_or_else(|| eyre!("HTTP 500"))
        }
        async fn get_latest_run(&self, _workflow: &str, _branch: &str) -> Result<WorkflowRun> {
            Err(eyre!("not used"))
        }
    }

    fn make_step(name: &str, number: i64, conclusion: Conclusion) -> Step {
        Step {
            name: name.to_string(),
            status: RunStatus::Completed,
            conclusion: Some(conclusion),
            number,
        }
    }

    fn build_job(id: i64, name: &str, steps: Vec<Step>) -> Job {
        Job {
            id,
            name: name.to_string(),
            status: RunStatus::Completed,
            conclusion: Some(Conclusion::Success),
            started_at: None,
            steps,
        }
    }

    fn four_step_job(id: i64) -> Job {
        build_job(
            id,
            "build",
            vec![
                make_step("Run actions/checkout@v4", 1, Conclusion::Success),
                make_step("Set up Python 3.11", 2, Conclusion::Success),
                make_step("Install dependencies", 3, Conclusion::Success),
                make_step("Run tests", 4, Conclusion::Success),
            ],
        )
    }

    #[tokio::test]
    async fn fetches_four_steps_from_successful_run() {
        let run_id = 12345;
        let job_id = 67890;
        let client = Arc::new(JobsClient::new(vec![(run_id, vec![four_step_job(job_id)])]));
        let mock = MockExecutor::new();
        mock.add_run_view(run_id, job_id, SUCCESSFUL_RUN_LOG);
        let mock = Arc::new(mock);
        let fetcher = LogFetcher::new(client, Arc::clone(&mock) as Arc<dyn CommandExecutor>);

        let steps = fetcher.fetch_step_logs(run_id, "ci.yml").await.unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].step_name, "Run actions/checkout@v4");
        assert_eq!(steps[1].step_name, "Set up Python 3.11");
        assert_eq!(steps[2].step_name, "Install dependencies");
        assert_eq!(steps[3].step_name, "Run tests");
        for (i, step) in steps.iter().enumerate() {
            assert_eq!(step.step_index, i);
            assert_eq!(step.conclusion, Some(Conclusion::Success));
            assert!(step.error.is_none());
            assert!(!step.entries.is_empty());
        }
        assert!(steps[0]
            .entries
            .iter()
            .any(|e| e.content == "##[group]Run actions/checkout@v4"));
        assert!(!steps
            .iter()
            .flat_map(|s| &s.entries)
            .any(|e| e.level == LogLevel::Error));
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn detects_error_entries_in_failed_run() {
        let run_id = 12346;
        let job_id = 67891;
        let job = build_job(
            job_id,
            "build",
            vec![
                make_step("Run actions/checkout@v4", 1, Conclusion::Success),
                make_step("Install dependencies", 2, Conclusion::Failure),
            ],
        );
        let client = Arc::new(JobsClient::new(vec![(run_id, vec![job])]));
        let mock = MockExecutor::new();
        mock.add_run_view(run_id, job_id, FAILED_RUN_LOG);
        let fetcher = LogFetcher::new(client, Arc::new(mock));

        let steps = fetcher.fetch_step_logs(run_id, "ci.yml").await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].conclusion, Some(Conclusion::Failure));
        let error_lines: Vec<_> = steps[1]
            .entries
            .iter()
            .filter(|e| e.level == LogLevel::Error)
            .collect();
        assert_eq!(error_lines.len(), 2);
    }

    #[tokio::test]
    async fn group_count_mismatch_keeps_shorter_prefix() {
        let run_id = 1;
        let job_id = 2;
        // Three groups in the text, two declared steps.
        let raw = "\
##[group]One
a
##[endgroup]
##[group]Two
b
##[endgroup]
##[group]Three
c
##[endgroup]";
        let job = build_job(
            job_id,
            "build",
            vec![
                make_step("One", 1, Conclusion::Success),
                make_step("Two", 2, Conclusion::Success),
            ],
        );
        let client = Arc::new(JobsClient::new(vec![(run_id, vec![job])]));
        let mock = MockExecutor::new();
        mock.add_run_view(run_id, job_id, raw);
        let fetcher = LogFetcher::new(client, Arc::new(mock));

        let steps = fetcher.fetch_step_logs(run_id, "ci.yml").await.unwrap();
        assert_eq!(steps.len(), 2);

        // And the converse: more steps declared than groups present.
        let run_id = 3;
        let job_id = 4;
        let raw = "##[group]Only\nx\n##[endgroup]";
        let job = build_job(
            job_id,
            "build",
            vec![
                make_step("Only", 1, Conclusion::Success),
                make_step("Missing", 2, Conclusion::Success),
            ],
        );
        let client = Arc::new(JobsClient::new(vec![(run_id, vec![job])]));
        let mock = MockExecutor::new();
        mock.add_run_view(run_id, job_id, raw);
        let fetcher = LogFetcher::new(client, Arc::new(mock));
        let steps = fetcher.fetch_step_logs(run_id, "ci.yml").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_name, "Only");
    }

    #[tokio::test]
    async fn job_fetch_failure_yields_placeholder_steps() {
        let run_id = 12348;
        let job_id = 67893;
        let job = build_job(
            job_id,
            "build",
            vec![make_step("Run tests", 1, Conclusion::Success)],
        );
        let client = Arc::new(JobsClient::new(vec![(run_id, vec![job])]));
        let mock = MockExecutor::new();
        mock.add_run_view_error(run_id, job_id, "HTTP 401: Bad credentials", "exit status 1");
        let fetcher = LogFetcher::new(client, Arc::new(mock));

        let steps = fetcher.fetch_step_logs(run_id, "ci.yml").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].entries.is_empty());
        let err = steps[0].error.as_ref().unwrap();
        assert!(err.contains("HTTP 401"));
    }

    #[tokio::test]
    async fn jobs_api_failure_is_fatal() {
        let client = Arc::new(JobsClient::new(vec![]));
        let mock = MockExecutor::new();
        let fetcher = LogFetcher::new(client, Arc::new(mock));
        let err = fetcher.fetch_step_logs(404, "ci.yml").await.unwrap_err();
        assert!(format!("{err}").contains("failed to fetch jobs"));
    }

    #[tokio::test]
    async fn step_index_dense_across_jobs() {
        let run_id = 10;
        let job_a = build_job(
            100,
            "build",
            vec![
                make_step("A1", 1, Conclusion::Success),
                make_step("A2", 2, Conclusion::Success),
            ],
        );
        let job_b = build_job(200, "test", vec![make_step("B1", 1, Conclusion::Success)]);
        let client = Arc::new(JobsClient::new(vec![(run_id, vec![job_a, job_b])]));
        let mock = MockExecutor::new();
        mock.add_run_view(run_id, 100, "##[group]A1\n##[endgroup]\n##[group]A2\n##[endgroup]");
        mock.add_run_view(run_id, 200, "##[group]B1\n##[endgroup]");
        let fetcher = LogFetcher::new(client, Arc::new(mock));

        let steps = fetcher.fetch_step_logs(run_id, "ci.yml").await.unwrap();
        assert_eq!(steps.len(), 3);
        let indices: Vec<usize> = steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(steps[2].job_name, "test");
    }

    #[tokio::test]
    async fn fetch_workflow_logs_shells_out_without_job_flag() {
        let client = Arc::new(JobsClient::new(vec![]));
        let mock = Arc::new(MockExecutor::new());
        mock.add("gh", &["run", "view", "55", "--log"], "raw text", "", None);
        let fetcher = LogFetcher::new(client, Arc::clone(&mock) as Arc<dyn CommandExecutor>);
        let raw = fetcher.fetch_workflow_logs(55).await.unwrap();
        assert_eq!(raw, "raw text");
    }

    #[tokio::test]
    async fn availability_check_passes_when_installed_and_authed() {
        let mock = MockExecutor::new();
        mock.add("gh", &["--version"], "gh version 2.40.0 (2024-01-01)", "", None);
        mock.add("gh", &["auth", "status"], "Logged in to github.com", "", None);
        assert!(check_gh_cli_available(&mock).await.is_ok());
    }

    #[tokio::test]
    async fn availability_check_fails_when_missing() {
        let mock = MockExecutor::new();
        mock.add("gh", &["--version"], "", "command not found", Some("exit status 127"));
        let err = check_gh_cli_available(&mock).await.unwrap_err();
        assert!(format!("{err}").contains("cli.github.com"));
    }

    #[tokio::test]
    async fn availability_check_fails_when_unauthenticated() {
        let mock = MockExecutor::new();
        mock.add("gh", &["--version"], "gh version 2.40.0", "", None);
        mock.add("gh", &["auth", "status"], "", "You are not logged in", Some("exit status 1"));
        let err = check_gh_cli_available(&mock).await.unwrap_err();
        assert!(format!("{err}").contains("gh auth login"));
    }
}
