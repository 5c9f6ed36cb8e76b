//! Chain failure taxonomy.
//!
//! Three families, distinguishable by variant so consumers can branch:
//! interpolation and dispatch errors happen before a run exists;
//! execution errors carry the run id and URL of the failed run.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("step {step}: failed to render template {template:?}: {reason}")]
    Interpolation {
        step: usize,
        template: String,
        reason: String,
        suggestion: String,
    },

    #[error("step {step}: failed to dispatch {workflow}: {reason}")]
    StepDispatch {
        step: usize,
        workflow: String,
        reason: String,
        suggestion: String,
    },

    #[error("step {step}: {workflow} run {run_id} concluded {conclusion:?}: {reason}")]
    StepExecution {
        step: usize,
        workflow: String,
        run_id: i64,
        run_url: String,
        conclusion: String,
        reason: String,
        suggestion: String,
    },
}

impl ChainError {
    /// Index of the step the error is attributed to.
    pub fn step(&self) -> usize {
        match self {
            ChainError::Interpolation { step, .. }
            | ChainError::StepDispatch { step, .. }
            | ChainError::StepExecution { step, .. } => *step,
        }
    }

    /// The failed run's id, when a run was created.
    pub fn run_id(&self) -> Option<i64> {
        match self {
            ChainError::StepExecution { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }

    /// The failed run's HTML URL, when a run was created.
    pub fn run_url(&self) -> Option<&str> {
        match self {
            ChainError::StepExecution { run_url, .. } if !run_url.is_empty() => Some(run_url),
            _ => None,
        }
    }

    pub fn suggestion(&self) -> &str {
        match self {
            ChainError::Interpolation { suggestion, .. }
            | ChainError::StepDispatch { suggestion, .. }
            | ChainError::StepExecution { suggestion, .. } => suggestion,
        }
    }
}
