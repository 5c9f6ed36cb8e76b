//! Incremental log streaming for an in-progress run.
//!
//! The streamer polls the fetcher while the run is active and emits only
//! the entries it has not seen before, per step. The view keeps the
//! cumulative buffer; successive updates for a step carry disjoint,
//! contiguous slices whose concatenation equals the step's full entries.

use crate::events::StreamUpdate;
use crate::github::{ActionsClient, RunStatus};
use crate::logs::entry::StepLogs;
use crate::logs::fetcher::LogFetcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const DEFAULT_STREAM_INTERVAL: Duration = Duration::from_secs(2);
const UPDATE_BUFFER: usize = 32;

/// Last-observed entry count per step index.
#[derive(Debug, Default)]
pub struct StreamState {
    step_line_counts: HashMap<usize, usize>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the current logs against the last observation and return the
    /// per-step deltas, updating the counts. A step whose entry count
    /// shrank (a re-run reordering its groups) is reset and re-emitted in
    /// full.
    pub fn detect_new(&mut self, current: &[StepLogs]) -> Vec<StreamUpdate> {
        let mut updates = Vec::new();
        for step in current {
            let last = self
                .step_line_counts
                .get(&step.step_index)
                .copied()
                .unwrap_or(0);
            let count = step.entries.len();
            if count < last {
                self.step_line_counts.insert(step.step_index, count);
                updates.push(StreamUpdate {
                    step_index: step.step_index,
                    new_entries: step.entries.clone(),
                    terminal: false,
                });
            } else if count > last {
                self.step_line_counts.insert(step.step_index, count);
                updates.push(StreamUpdate {
                    step_index: step.step_index,
                    new_entries: step.entries[last..].to_vec(),
                    terminal: false,
                });
            }
        }
        updates
    }

    fn max_step_index(&self) -> usize {
        self.step_line_counts.keys().copied().max().unwrap_or(0)
    }
}

pub struct LogStreamer {
    stop_tx: watch::Sender<bool>,
}

impl LogStreamer {
    /// Start streaming and return the handle plus the update stream. The
    /// stream closes after the terminal update or on [`LogStreamer::stop`].
    pub fn spawn(
        client: Arc<dyn ActionsClient>,
        fetcher: Arc<LogFetcher>,
        run_id: i64,
        workflow: &str,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<StreamUpdate>) {
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(stream_loop(
            client,
            fetcher,
            run_id,
            workflow.to_string(),
            interval,
            tx,
            stop_rx,
        ));
        (Self { stop_tx }, rx)
    }

    /// Cancel the loop promptly. An in-flight fetch is allowed to complete;
    /// its result is discarded.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

async fn stream_loop(
    client: Arc<dyn ActionsClient>,
    fetcher: Arc<LogFetcher>,
    run_id: i64,
    workflow: String,
    interval: Duration,
    tx: mpsc::Sender<StreamUpdate>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut state = StreamState::new();

    loop {
        if *stop_rx.borrow() {
            return;
        }

        let terminal = match client.get_workflow_run(run_id).await {
            Ok(run) => run.status == RunStatus::Completed,
            Err(e) => {
                tracing::warn!(run_id, error = %e, "run poll failed");
                false
            }
        };

        let mut updates = match fetcher.fetch_step_logs(run_id, &workflow).await {
            Ok(current) => state.detect_new(&current),
            Err(e) => {
                tracing::warn!(run_id, error = %e, "log fetch failed");
                Vec::new()
            }
        };

        if terminal {
            // Flag the last delta of the final poll, or synthesize an empty
            // terminal marker when the final poll brought nothing new.
            match updates.last_mut() {
                Some(last) => last.terminal = true,
                None => updates.push(StreamUpdate {
                    step_index: state.max_step_index(),
                    new_entries: Vec::new(),
                    terminal: true,
                }),
            }
        }

        for update in updates {
            if tx.send(update).await.is_err() {
                return; // receiver dropped
            }
        }
        if terminal {
            return;
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = stop_rx.changed() => {}
        }
    }
}
