#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::eyre::{eyre, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use ghd::chain::{Chain, ChainStep, OnFailure, WaitFor};
use ghd::events::RunUpdate;
use ghd::github::{ActionsClient, Conclusion, Job, RunStatus, Step, WorkflowRun};
use ghd::watcher::RunWatcher;

pub fn make_run(id: i64, status: RunStatus, conclusion: Option<Conclusion>) -> WorkflowRun {
    WorkflowRun {
        id,
        name: "CI".to_string(),
        status,
        conclusion,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        head_branch: "main".to_string(),
        html_url: format!("https://github.com/test/repo/actions/runs/{id}"),
    }
}

pub fn make_step(name: &str, number: i64, conclusion: Conclusion) -> Step {
    Step {
        name: name.to_string(),
        status: RunStatus::Completed,
        conclusion: Some(conclusion),
        number,
    }
}

pub fn make_job(id: i64, name: &str, steps: Vec<Step>) -> Job {
    Job {
        id,
        name: name.to_string(),
        status: RunStatus::Completed,
        conclusion: Some(Conclusion::Success),
        started_at: Some(Utc::now()),
        steps,
    }
}

pub fn chain_step(workflow: &str, wait_for: WaitFor, on_failure: OnFailure) -> ChainStep {
    ChainStep {
        workflow: workflow.to_string(),
        inputs: BTreeMap::new(),
        wait_for,
        on_failure,
    }
}

pub fn chain_step_with_inputs(
    workflow: &str,
    inputs: &[(&str, &str)],
    wait_for: WaitFor,
    on_failure: OnFailure,
) -> ChainStep {
    let mut step = chain_step(workflow, wait_for, on_failure);
    step.inputs = inputs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    step
}

pub fn chain_of(steps: Vec<ChainStep>) -> Chain {
    Chain {
        description: String::new(),
        variables: Vec::new(),
        steps,
    }
}

/// GitHub client double: `get_latest_run` hands out fresh run ids from a
/// counter, and per-run states can be scripted for status polling.
pub struct MockClient {
    next_run_id: AtomicI64,
    pub runs: Mutex<HashMap<i64, WorkflowRun>>,
    pub jobs: Mutex<HashMap<i64, Vec<Job>>>,
}

impl MockClient {
    pub fn new(first_run_id: i64) -> Arc<Self> {
        Arc::new(Self {
            next_run_id: AtomicI64::new(first_run_id),
            runs: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_run(&self, run: WorkflowRun) {
        self.runs.lock().unwrap().insert(run.id, run);
    }

    pub fn set_jobs(&self, run_id: i64, jobs: Vec<Job>) {
        self.jobs.lock().unwrap().insert(run_id, jobs);
    }
}

#[async_trait]
impl ActionsClient for MockClient {
    async fn get_workflow_run(&self, run_id: i64) -> Result<WorkflowRun> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .get(&run_id)
            .cloned()
            .unwrap_or_else(|| make_run(run_id, RunStatus::Queued, None)))
    }

    async fn get_workflow_run_jobs(&self, run_id: i64) -> Result<Vec<Job>> {
        self.jobs
            .lock()
            .unwrap()
            .get(&run_id)
            .cloned()
            .ok_or_else(|| eyre!("no jobs scripted for run {run_id}"))
    }

    async fn get_latest_run(&self, _workflow: &str, _branch: &str) -> Result<WorkflowRun> {
        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        Ok(make_run(id, RunStatus::Queued, None))
    }
}

/// Watcher double: records subscriptions, lets tests push updates.
pub struct MockWatcher {
    pub watched: Mutex<BTreeMap<i64, String>>,
    tx: mpsc::Sender<RunUpdate>,
    rx: tokio::sync::Mutex<mpsc::Receiver<RunUpdate>>,
}

impl MockWatcher {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(16);
        Arc::new(Self {
            watched: Mutex::new(BTreeMap::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub async fn push(&self, run_id: i64, status: RunStatus, conclusion: Option<Conclusion>) {
        self.tx
            .send(RunUpdate {
                run_id,
                run: make_run(run_id, status, conclusion),
            })
            .await
            .expect("mock watcher channel closed");
    }

    pub async fn wait_for_watch(&self, run_id: i64) {
        while !self.watched.lock().unwrap().contains_key(&run_id) {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }
}

#[async_trait]
impl RunWatcher for MockWatcher {
    fn watch(&self, run_id: i64, workflow_name: &str) {
        self.watched
            .lock()
            .unwrap()
            .insert(run_id, workflow_name.to_string());
    }

    fn unwatch(&self, run_id: i64) {
        self.watched.lock().unwrap().remove(&run_id);
    }

    async fn recv(&self) -> Option<RunUpdate> {
        self.rx.lock().await.recv().await
    }
}
