//! The discriminated messages the long-lived emitters publish.
//!
//! Watcher, chain executor and log streamer each expose a read-only stream
//! of one of these types plus a `stop` method; a UI pump multiplexes them
//! into its own loop as [`CoreEvent`]s. Nothing here reaches back into the
//! emitters.

use crate::chain::ChainState;
use crate::github::WorkflowRun;
use crate::logs::LogEntry;

/// Status-transition notification for a watched run.
#[derive(Debug, Clone)]
pub struct RunUpdate {
    pub run_id: i64,
    pub run: WorkflowRun,
}

/// Snapshot of chain state, emitted on every transition.
#[derive(Debug, Clone)]
pub struct ChainUpdate {
    pub state: ChainState,
}

/// Incremental log delta for one step of a streamed run.
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub step_index: usize,
    pub new_entries: Vec<LogEntry>,
    pub terminal: bool,
}

/// Envelope for the UI message loop.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Run(RunUpdate),
    Chain(ChainUpdate),
    Stream(StreamUpdate),
}
