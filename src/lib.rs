#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::struct_excessive_bools,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::too_many_arguments,
    clippy::doc_markdown
)]

pub mod chain;
pub mod cli;
pub mod events;
pub mod exec;
pub mod frecency;
pub mod github;
pub mod logs;
pub mod paths;
pub mod runner;
pub mod watcher;
pub mod workflow;
