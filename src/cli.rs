use clap::{Parser, Subcommand};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_NUMBER"));

#[derive(Parser, Debug)]
#[command(name = "ghd", version = VERSION, about = "GitHub Actions workflow dispatch orchestrator")]
pub struct Cli {
    /// Repository in owner/repo format (auto-detected from cwd)
    #[arg(short, long, global = true)]
    pub repo: Option<String>,

    /// Write debug logs to the state directory
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List dispatchable workflows and their inputs
    List,

    /// List configured workflow chains
    Chains,

    /// Dispatch a workflow
    Run {
        /// Workflow file name (e.g. ci.yml)
        workflow: String,

        /// Git ref to run on (auto-detected from cwd)
        #[arg(short = 'b', long = "ref")]
        git_ref: Option<String>,

        /// Workflow inputs as key=value pairs
        #[arg(short = 'f', long = "field", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Watch the run until it completes
        #[arg(short, long)]
        watch: bool,
    },

    /// Execute a workflow chain
    Chain {
        /// Chain name from .github/chains.yml
        name: String,

        /// Git ref to run on (auto-detected from cwd)
        #[arg(short = 'b', long = "ref")]
        git_ref: Option<String>,

        /// Chain variables as key=value pairs
        #[arg(long = "var", value_name = "KEY=VALUE")]
        variables: Vec<String>,

        /// Resume at this step index, reusing recorded results of earlier
        /// steps from history
        #[arg(long, value_name = "STEP")]
        resume_from: Option<usize>,
    },

    /// Fetch and filter logs for a run
    Logs {
        /// Run id
        run_id: i64,

        /// Workflow file the run belongs to
        #[arg(short, long, default_value = "")]
        workflow: String,

        /// Show only error-level entries
        #[arg(long)]
        errors_only: bool,

        /// Search term applied to each line
        #[arg(short, long, default_value = "")]
        search: String,

        /// Treat the search term as a regular expression
        #[arg(long)]
        regex: bool,

        /// Restrict to one step index (-1 for all)
        #[arg(long, default_value_t = -1)]
        step: i32,
    },

    /// Show frecency-ranked run history for this repository
    History {
        /// Restrict to one workflow file
        #[arg(short, long, default_value = "")]
        workflow: String,

        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
}

/// Split `key=value` arguments, rejecting malformed ones.
pub fn parse_key_values(pairs: &[String]) -> Result<Vec<(String, String)>, String> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("expected KEY=VALUE, got {pair:?}"))
        })
        .collect()
}
