//! Shared multi-subscription run poller.
//!
//! One background task polls every watched run on a fixed cadence and emits
//! a [`RunUpdate`] whenever a run's `(status, conclusion)` pair changes.
//! Terminal runs unsubscribe themselves after their final update. When
//! nothing is watched the loop parks until the next `watch` call, so an
//! idle watcher costs nothing.

use crate::events::RunUpdate;
use crate::github::{ActionsClient, Conclusion, RunStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const UPDATE_BUFFER: usize = 32;

/// Subscription surface consumed by chain executors and the UI pump.
#[async_trait]
pub trait RunWatcher: Send + Sync {
    fn watch(&self, run_id: i64, workflow_name: &str);
    fn unwatch(&self, run_id: i64);
    /// Receive the next update in production order. Returns `None` once the
    /// watcher has stopped and the stream is drained.
    async fn recv(&self) -> Option<RunUpdate>;
}

#[derive(Default)]
struct WatchState {
    watched: HashMap<i64, String>,
    last: HashMap<i64, (RunStatus, Option<Conclusion>)>,
    stopped: bool,
}

pub struct Watcher {
    state: Arc<Mutex<WatchState>>,
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    updates_rx: tokio::sync::Mutex<mpsc::Receiver<RunUpdate>>,
}

impl Watcher {
    /// Start the polling task. The watcher keeps running until [`Watcher::stop`].
    pub fn spawn(client: Arc<dyn ActionsClient>, interval: Duration) -> Self {
        let state = Arc::new(Mutex::new(WatchState::default()));
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);

        tokio::spawn(poll_loop(
            client,
            Arc::clone(&state),
            Arc::clone(&wake),
            shutdown_rx,
            tx,
            interval,
        ));

        Self {
            state,
            wake,
            shutdown_tx,
            updates_rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Stop the polling task and close the update stream. Subsequent
    /// `watch`/`unwatch` calls are no-ops.
    pub fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        let _ = self.shutdown_tx.send(true);
        self.wake.notify_one();
    }

    pub fn watched_count(&self) -> usize {
        self.state.lock().unwrap().watched.len()
    }
}

#[async_trait]
impl RunWatcher for Watcher {
    fn watch(&self, run_id: i64, workflow_name: &str) {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        state.watched.insert(run_id, workflow_name.to_string());
        drop(state);
        self.wake.notify_one();
    }

    fn unwatch(&self, run_id: i64) {
        let mut state = self.state.lock().unwrap();
        if state.stopped {
            return;
        }
        state.watched.remove(&run_id);
        state.last.remove(&run_id);
    }

    async fn recv(&self) -> Option<RunUpdate> {
        self.updates_rx.lock().await.recv().await
    }
}

async fn poll_loop(
    client: Arc<dyn ActionsClient>,
    state: Arc<Mutex<WatchState>>,
    wake: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
    tx: mpsc::Sender<RunUpdate>,
    interval: Duration,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let ids: Vec<i64> = {
            let state = state.lock().unwrap();
            state.watched.keys().copied().collect()
        };

        if ids.is_empty() {
            // Park until a subscription or shutdown arrives.
            tokio::select! {
                () = wake.notified() => {}
                _ = shutdown_rx.changed() => {}
            }
            continue;
        }

        for run_id in ids {
            if *shutdown_rx.borrow() {
                return;
            }
            match client.get_workflow_run(run_id).await {
                Ok(run) => {
                    let key = (run.status, run.conclusion);
                    let changed = {
                        let mut state = state.lock().unwrap();
                        if !state.watched.contains_key(&run_id) {
                            continue; // unwatched while we were fetching
                        }
                        let changed = state.last.get(&run_id) != Some(&key);
                        if changed {
                            state.last.insert(run_id, key);
                        }
                        changed
                    };
                    if changed {
                        let terminal = run.status == RunStatus::Completed;
                        if tx.send(RunUpdate { run_id, run }).await.is_err() {
                            return; // receiver dropped
                        }
                        if terminal {
                            let mut state = state.lock().unwrap();
                            state.watched.remove(&run_id);
                            state.last.remove(&run_id);
                        }
                    }
                }
                Err(e) => {
                    // Transient failures keep the subscription; next tick retries.
                    tracing::warn!(run_id, error = %e, "run fetch failed");
                }
            }
        }

        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}
