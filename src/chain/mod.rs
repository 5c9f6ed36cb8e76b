//! Workflow chains: configuration, template interpolation, and the
//! sequential execution state machine.

pub mod config;
pub mod error;
pub mod executor;
pub mod interpolate;

pub use config::{Chain, ChainStep, ChainsFile, OnFailure, Variable, WaitFor};
pub use error::ChainError;
pub use executor::{
    ChainExecutor, ChainState, ChainStatus, PreviousStepResult, StepResult, StepStatus,
};
