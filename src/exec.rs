//! Command execution behind an injectable seam.
//!
//! Every external process the tool spawns goes through [`CommandExecutor`],
//! which makes the whole pipeline testable without side effects: components
//! take the executor by reference and never reach for a global. The real
//! implementation additionally refuses known `gh` mutation verbs when the
//! process runs under a test harness.

use async_trait::async_trait;
use color_eyre::eyre::{eyre, Result};
use std::sync::Mutex;
use tokio::process::Command;

/// Environment variable set by the test harness. When present, any attempt
/// to spawn a `gh` mutation verb through [`RealExecutor`] panics.
pub const FORBID_MUTATIONS_ENV: &str = "GHD_FORBID_MUTATIONS";

/// Outcome of a command execution: captured output plus an optional error.
/// `error` is set for both spawn failures and non-zero exits; stderr is
/// preserved alongside it so callers can surface CLI diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            error: None,
        }
    }

    pub fn fail(stderr: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Unwrap stdout, turning a failed execution into an error that carries
    /// the captured stderr.
    pub fn success_stdout(self, context: &str) -> Result<String> {
        match self.error {
            None => Ok(self.stdout),
            Some(err) => {
                let stderr = self.stderr.trim();
                if stderr.is_empty() {
                    Err(eyre!("{context}: {err}"))
                } else {
                    Err(eyre!("{context}: {err} (stderr: {stderr})"))
                }
            }
        }
    }
}

/// A single capability: run `(program, argv)` and report what happened.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, program: &str, args: &[String]) -> CommandResult;
}

/// Convenience for building owned argv vectors at call sites and in tests.
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Recorded invocation, exposed by [`MockExecutor::calls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// True when `(program, argv)` denotes a remote-state mutation.
///
/// The enumeration is part of the contract: `workflow run`, run
/// cancel/rerun/delete, and create/edit/delete/close/merge under the
/// write-capable nouns. Read-only verbs (`api`, `run view`, `run list`,
/// `auth status`, `--version`, ...) never match.
pub fn is_mutation_argv(program: &str, args: &[String]) -> bool {
    if program != "gh" {
        return false;
    }
    let mut positional = args
        .iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with('-'));
    let (Some(noun), Some(verb)) = (positional.next(), positional.next()) else {
        return false;
    };
    match noun {
        "workflow" => verb == "run",
        "run" => matches!(verb, "cancel" | "rerun" | "delete"),
        "issue" | "pr" | "release" | "repo" | "secret" | "variable" | "label" | "extension" => {
            matches!(verb, "create" | "edit" | "delete" | "close" | "merge")
        }
        _ => false,
    }
}

fn mutations_forbidden() -> bool {
    std::env::var_os(FORBID_MUTATIONS_ENV).is_some()
}

/// Spawns real processes with captured stdout/stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for RealExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> CommandResult {
        assert!(
            !(mutations_forbidden() && is_mutation_argv(program, args)),
            "refusing to execute mutation under {FORBID_MUTATIONS_ENV}: {program} {}",
            args.join(" ")
        );

        let output = match Command::new(program).args(args).output().await {
            Ok(output) => output,
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{program} not found")
                } else {
                    format!("failed to run {program}: {e}")
                };
                return CommandResult::fail(String::new(), error);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let error = if output.status.success() {
            None
        } else {
            Some(format!("{program} exited with {}", output.status))
        };
        CommandResult {
            stdout,
            stderr,
            error,
        }
    }
}

/// Table-driven executor for tests. Responses are keyed by the joined
/// command line; `*` in a registered argv matches any single segment.
/// Every call is recorded and can be inspected afterwards.
#[derive(Default)]
pub struct MockExecutor {
    inner: Mutex<MockInner>,
}

#[derive(Default)]
struct MockInner {
    commands: Vec<(String, CommandResult)>,
    default_result: Option<CommandResult>,
    executed: Vec<ExecutedCommand>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, program: &str, args: &[&str], stdout: &str, stderr: &str, error: Option<&str>) {
        let key = build_key(program, &argv(args));
        let result = CommandResult {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            error: error.map(ToString::to_string),
        };
        self.inner.lock().unwrap().commands.push((key, result));
    }

    /// Register a `gh run view <id> --log [--job <job-id>]` response.
    pub fn add_run_view(&self, run_id: i64, job_id: i64, log_output: &str) {
        let args = run_view_args(run_id, job_id);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.add("gh", &refs, log_output, "", None);
    }

    /// Register a failing `gh run view` response.
    pub fn add_run_view_error(&self, run_id: i64, job_id: i64, stderr: &str, error: &str) {
        let args = run_view_args(run_id, job_id);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.add("gh", &refs, "", stderr, Some(error));
    }

    pub fn set_default(&self, result: CommandResult) {
        self.inner.lock().unwrap().default_result = Some(result);
    }

    pub fn calls(&self) -> Vec<ExecutedCommand> {
        self.inner.lock().unwrap().executed.clone()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.clear();
        inner.default_result = None;
        inner.executed.clear();
    }
}

fn run_view_args(run_id: i64, job_id: i64) -> Vec<String> {
    let mut args = argv(&["run", "view", &run_id.to_string(), "--log"]);
    if job_id > 0 {
        args.push("--job".to_string());
        args.push(job_id.to_string());
    }
    args
}

fn build_key(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().cloned());
    parts.join(" ")
}

fn matches_pattern(key: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return key == pattern;
    }
    let key_parts: Vec<&str> = key.split(' ').collect();
    let pattern_parts: Vec<&str> = pattern.split(' ').collect();
    if key_parts.len() != pattern_parts.len() {
        return false;
    }
    pattern_parts
        .iter()
        .zip(&key_parts)
        .all(|(p, k)| *p == "*" || p == k)
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> CommandResult {
        let mut inner = self.inner.lock().unwrap();
        inner.executed.push(ExecutedCommand {
            program: program.to_string(),
            args: args.to_vec(),
        });

        let key = build_key(program, args);
        if let Some((_, result)) = inner
            .commands
            .iter()
            .find(|(pattern, _)| matches_pattern(&key, pattern))
        {
            return result.clone();
        }
        if let Some(default) = &inner.default_result {
            return default.clone();
        }
        CommandResult::fail(
            String::new(),
            format!("no mock configured for command: {key}"),
        )
    }
}
