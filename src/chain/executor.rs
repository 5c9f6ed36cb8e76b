//! Sequential chain execution.
//!
//! An executor owns its [`ChainState`] and the channel of emitted
//! [`ChainUpdate`]s. All state mutation happens on the executor's own task;
//! the UI calls `start`/`stop`/`state`/`updates` and consumes the stream.
//! Step outcomes become chain outcomes only here, via each step's
//! `on_failure` policy.

use crate::chain::config::{Chain, ChainStep, OnFailure, WaitFor};
use crate::chain::error::ChainError;
use crate::chain::interpolate::{interpolate, Context};
use crate::events::ChainUpdate;
use crate::github::{conclusion_str, ActionsClient, Conclusion, RunStatus, WorkflowRun};
use crate::runner::{RunConfig, Runner};
use crate::watcher::RunWatcher;
use color_eyre::eyre::{eyre, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

const UPDATE_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ChainStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChainStatus::Completed | ChainStatus::Failed | ChainStatus::Stopped
        )
    }
}

/// Outcome of one chain step, exposed to later steps as `steps.i.*`.
/// Inputs are stored post-interpolation so a later template sees a fully
/// materialized predecessor.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub workflow: String,
    pub inputs: BTreeMap<String, String>,
    pub run_id: i64,
    pub status: RunStatus,
    pub conclusion: Option<Conclusion>,
}

/// A prior step outcome supplied when resuming a chain from history.
#[derive(Debug, Clone)]
pub struct PreviousStepResult {
    pub workflow: String,
    pub run_id: i64,
    pub status: String,
    pub conclusion: String,
}

#[derive(Debug, Clone)]
pub struct ChainState {
    pub chain_name: String,
    pub status: ChainStatus,
    pub current_step: usize,
    pub step_statuses: Vec<StepStatus>,
    pub step_results: BTreeMap<usize, StepResult>,
    pub error: Option<ChainError>,
}

impl ChainState {
    fn new(chain_name: &str, step_count: usize) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            status: ChainStatus::Pending,
            current_step: 0,
            step_statuses: vec![StepStatus::Pending; step_count],
            step_results: BTreeMap::new(),
            error: None,
        }
    }
}

pub struct ChainExecutor {
    client: Arc<dyn ActionsClient>,
    watcher: Arc<dyn RunWatcher>,
    runner: Arc<Runner>,
    chain_name: String,
    chain: Chain,
    resume_index: usize,
    state: Arc<Mutex<ChainState>>,
    updates_tx: Mutex<Option<mpsc::Sender<ChainUpdate>>>,
    updates_rx: Mutex<Option<mpsc::Receiver<ChainUpdate>>>,
    stop_tx: watch::Sender<bool>,
}

impl ChainExecutor {
    pub fn new(
        client: Arc<dyn ActionsClient>,
        watcher: Arc<dyn RunWatcher>,
        runner: Arc<Runner>,
        chain_name: &str,
        chain: Chain,
    ) -> Self {
        Self::with_resume(client, watcher, runner, chain_name, chain, &[], 0)
    }

    /// Resume a partially executed chain: steps before `resume_index` are
    /// seeded as completed, and their results are visible to templates.
    pub fn new_from_history(
        client: Arc<dyn ActionsClient>,
        watcher: Arc<dyn RunWatcher>,
        runner: Arc<Runner>,
        chain_name: &str,
        chain: Chain,
        previous_results: &[PreviousStepResult],
        resume_index: usize,
    ) -> Self {
        Self::with_resume(
            client,
            watcher,
            runner,
            chain_name,
            chain,
            previous_results,
            resume_index,
        )
    }

    fn with_resume(
        client: Arc<dyn ActionsClient>,
        watcher: Arc<dyn RunWatcher>,
        runner: Arc<Runner>,
        chain_name: &str,
        chain: Chain,
        previous_results: &[PreviousStepResult],
        resume_index: usize,
    ) -> Self {
        let mut state = ChainState::new(chain_name, chain.steps.len());
        state.current_step = resume_index.min(chain.steps.len());
        for i in 0..state.current_step {
            state.step_statuses[i] = StepStatus::Completed;
        }
        for (i, prev) in previous_results.iter().enumerate().take(state.current_step) {
            state.step_results.insert(
                i,
                StepResult {
                    workflow: prev.workflow.clone(),
                    inputs: BTreeMap::new(),
                    run_id: prev.run_id,
                    status: RunStatus::parse(&prev.status),
                    conclusion: Conclusion::parse(&prev.conclusion),
                },
            );
        }

        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let (stop_tx, _) = watch::channel(false);
        Self {
            client,
            watcher,
            runner,
            chain_name: chain_name.to_string(),
            chain,
            resume_index: resume_index.min(state.step_statuses.len()),
            state: Arc::new(Mutex::new(state)),
            updates_tx: Mutex::new(Some(tx)),
            updates_rx: Mutex::new(Some(rx)),
            stop_tx,
        }
    }

    /// Snapshot of the current state, produced by copy.
    pub fn state(&self) -> ChainState {
        self.state.lock().unwrap().clone()
    }

    /// The update stream. Yields the receiver once; the stream closes when
    /// the chain reaches a terminal state.
    pub fn updates(&self) -> Option<mpsc::Receiver<ChainUpdate>> {
        self.updates_rx.lock().unwrap().take()
    }

    /// Begin execution on the executor's own task. The UI task is never
    /// blocked by chain progress.
    pub fn start(&self, variables: BTreeMap<String, String>, branch: &str) -> Result<()> {
        let tx = self
            .updates_tx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| eyre!("chain {:?} already started", self.chain_name))?;

        {
            let mut state = self.state.lock().unwrap();
            state.status = ChainStatus::Running;
        }

        let task = ChainTask {
            client: Arc::clone(&self.client),
            watcher: Arc::clone(&self.watcher),
            runner: Arc::clone(&self.runner),
            chain: self.chain.clone(),
            state: Arc::clone(&self.state),
            tx,
            stop_rx: self.stop_tx.subscribe(),
            variables,
            branch: branch.to_string(),
            resume_index: self.resume_index,
        };
        tokio::spawn(task.run());
        Ok(())
    }

    /// Request termination. The current step is observed to its next update
    /// so no dispatch is orphaned, then the chain transitions to `Stopped`
    /// and the update stream closes.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        // Never started: close the stream and mark the chain stopped now.
        if let Some(tx) = self.updates_tx.lock().unwrap().take() {
            let mut state = self.state.lock().unwrap();
            if state.status == ChainStatus::Pending {
                state.status = ChainStatus::Stopped;
            }
            drop(tx);
        }
    }
}

struct ChainTask {
    client: Arc<dyn ActionsClient>,
    watcher: Arc<dyn RunWatcher>,
    runner: Arc<Runner>,
    chain: Chain,
    state: Arc<Mutex<ChainState>>,
    tx: mpsc::Sender<ChainUpdate>,
    stop_rx: watch::Receiver<bool>,
    variables: BTreeMap<String, String>,
    branch: String,
    resume_index: usize,
}

enum StepOutcome {
    Completed,
    ContinuePastFailure,
    Abort,
    Stopped,
}

impl ChainTask {
    async fn run(mut self) {
        let step_count = self.chain.steps.len();
        if self.resume_index >= step_count {
            self.finish(ChainStatus::Completed).await;
            return;
        }
        self.emit().await;

        for i in self.resume_index..step_count {
            if *self.stop_rx.borrow() {
                self.finish(ChainStatus::Stopped).await;
                return;
            }
            let step = self.chain.steps[i].clone();
            match self.run_step(i, &step).await {
                StepOutcome::Completed | StepOutcome::ContinuePastFailure => {}
                StepOutcome::Abort => {
                    self.finish(ChainStatus::Failed).await;
                    return;
                }
                StepOutcome::Stopped => {
                    self.finish(ChainStatus::Stopped).await;
                    return;
                }
            }
        }

        self.finish(ChainStatus::Completed).await;
    }

    async fn run_step(&mut self, index: usize, step: &ChainStep) -> StepOutcome {
        {
            let mut state = self.state.lock().unwrap();
            state.step_statuses[index] = StepStatus::Running;
            state.current_step = index;
        }
        self.emit().await;

        // Render inputs against a snapshot of prior results.
        let rendered = {
            let steps_snapshot = self.state.lock().unwrap().step_results.clone();
            let ctx = Context {
                vars: &self.variables,
                steps: &steps_snapshot,
            };
            let mut rendered = BTreeMap::new();
            let mut failure: Option<ChainError> = None;
            for (key, template) in &step.inputs {
                match interpolate(template, &ctx) {
                    Ok(value) => {
                        rendered.insert(key.clone(), value);
                    }
                    Err(e) => {
                        failure = Some(ChainError::Interpolation {
                            step: index,
                            template: template.clone(),
                            reason: format!("{e}"),
                            suggestion: "declare the variable in the chain or fix the step reference"
                                .to_string(),
                        });
                        break;
                    }
                }
            }
            match failure {
                Some(err) => return self.fail_step(index, step, err).await,
                None => rendered,
            }
        };

        // Dispatch and resolve the created run.
        let cfg = RunConfig {
            workflow: step.workflow.clone(),
            branch: self.branch.clone(),
            inputs: rendered.clone(),
            watch: false,
        };
        let run_id = match self
            .runner
            .execute_and_get_run_id(&cfg, self.client.as_ref())
            .await
        {
            Ok(run_id) => run_id,
            Err(e) => {
                let err = ChainError::StepDispatch {
                    step: index,
                    workflow: step.workflow.clone(),
                    reason: format!("{e}"),
                    suggestion: "check that the workflow accepts workflow_dispatch and the inputs are valid"
                        .to_string(),
                };
                return self.fail_step(index, step, err).await;
            }
        };

        self.watcher.watch(run_id, &step.workflow);
        {
            let mut state = self.state.lock().unwrap();
            state.step_statuses[index] = StepStatus::Waiting;
            state.step_results.insert(
                index,
                StepResult {
                    workflow: step.workflow.clone(),
                    inputs: rendered,
                    run_id,
                    status: RunStatus::InProgress,
                    conclusion: None,
                },
            );
        }
        self.emit().await;

        if step.wait_for == WaitFor::None {
            // Eager advance: the step is complete with an empty conclusion.
            self.complete_step(index, RunStatus::Completed, None).await;
            return StepOutcome::Completed;
        }

        let run = match self.await_run(run_id, step.wait_for).await {
            WaitResult::Satisfied(run) => run,
            WaitResult::Stopped => return StepOutcome::Stopped,
        };

        if step.wait_for == WaitFor::Success && !run.is_success() {
            let conclusion = conclusion_str(run.conclusion).to_string();
            let err = ChainError::StepExecution {
                step: index,
                workflow: step.workflow.clone(),
                run_id,
                run_url: run.html_url.clone(),
                conclusion: conclusion.clone(),
                reason: format!("run concluded {conclusion:?}, wanted success"),
                suggestion: "open the run in a browser or view its logs".to_string(),
            };
            return self.fail_step(index, step, err).await;
        }

        if run.status != RunStatus::Completed {
            // wait_for: dispatched satisfied mid-flight; drop our interest.
            self.watcher.unwatch(run_id);
        }
        self.complete_step(index, run.status, run.conclusion).await;
        StepOutcome::Completed
    }

    /// Block on the watcher's stream until the wait predicate is satisfied
    /// or a stop request is observed at the step's next update.
    async fn await_run(&mut self, run_id: i64, wait_for: WaitFor) -> WaitResult {
        let mut stop_requested = *self.stop_rx.borrow();
        loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed(), if !stop_requested => {
                    stop_requested = *self.stop_rx.borrow();
                }
                update = self.watcher.recv() => {
                    let Some(update) = update else {
                        // Watcher shut down under us; nothing more will arrive.
                        return WaitResult::Stopped;
                    };
                    if update.run_id != run_id {
                        continue;
                    }
                    if stop_requested {
                        return WaitResult::Stopped;
                    }
                    let satisfied = match wait_for {
                        WaitFor::Dispatched => update.run.status != RunStatus::Queued,
                        WaitFor::Success | WaitFor::Completion => {
                            update.run.status == RunStatus::Completed
                        }
                        WaitFor::None => true,
                    };
                    if satisfied {
                        return WaitResult::Satisfied(update.run);
                    }
                }
            }
        }
    }

    async fn complete_step(
        &mut self,
        index: usize,
        status: RunStatus,
        conclusion: Option<Conclusion>,
    ) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(result) = state.step_results.get_mut(&index) {
                result.status = status;
                result.conclusion = conclusion;
            }
            state.step_statuses[index] = StepStatus::Completed;
            state.current_step = index + 1;
        }
        self.emit().await;
    }

    async fn fail_step(&mut self, index: usize, step: &ChainStep, err: ChainError) -> StepOutcome {
        let abort = step.on_failure == OnFailure::Abort;
        {
            let mut state = self.state.lock().unwrap();
            state.step_statuses[index] = StepStatus::Failed;
            state.error = Some(err);
            if abort {
                for status in state.step_statuses.iter_mut().skip(index + 1) {
                    *status = StepStatus::Skipped;
                }
            } else {
                // The step is logically done for ordering purposes.
                state.current_step = index + 1;
            }
        }
        if abort {
            // The terminal update from finish() carries the failure.
            StepOutcome::Abort
        } else {
            self.emit().await;
            StepOutcome::ContinuePastFailure
        }
    }

    async fn finish(&mut self, status: ChainStatus) {
        {
            let mut state = self.state.lock().unwrap();
            state.status = status;
        }
        self.emit().await;
        // Dropping self.tx when the task returns closes the update stream.
    }

    async fn emit(&self) {
        let snapshot = self.state.lock().unwrap().clone();
        // A consumer that went away must not halt chain execution.
        let _ = self.tx.send(ChainUpdate { state: snapshot }).await;
    }
}

enum WaitResult {
    Satisfied(WorkflowRun),
    Stopped,
}
