use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use ghd::chain::{self, ChainExecutor, ChainState, ChainStatus, PreviousStepResult, StepStatus};
use ghd::cli::{parse_key_values, Cli, Command};
use ghd::exec::{argv, CommandExecutor, RealExecutor};
use ghd::events::CoreEvent;
use ghd::frecency::{ChainStepResult, EntryType, FrecencyStore, HistoryEntry};
use ghd::github::{conclusion_str, ActionsClient, GitHubClient, RunStatus};
use ghd::logs::cache::{TTL_ACTIVE, TTL_TERMINAL};
use ghd::logs::streamer::DEFAULT_STREAM_INTERVAL;
use ghd::logs::{
    check_gh_cli_available, FilterConfig, FilterLevel, LogCache, LogFetcher, LogFilter, LogStreamer,
};
use ghd::paths;
use ghd::runner::{RunConfig, Runner, RunnerError};
use ghd::watcher::{RunWatcher, Watcher, DEFAULT_POLL_INTERVAL};
use ghd::workflow;

fn setup_verbose_logging() -> Result<()> {
    let state_dir = paths::state_dir();
    std::fs::create_dir_all(&state_dir)
        .map_err(|e| eyre!("Failed to create log directory {state_dir:?}: {e}"))?;
    let log_path = state_dir.join("debug.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| eyre!("Failed to open log file {log_path:?}: {e}"))?;
    tracing_subscriber::fmt()
        .with_writer(file)
        .with_ansi(false)
        .init();
    tracing::info!(
        "ghd v{} starting with verbose logging",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}

async fn detect_repo(executor: &dyn CommandExecutor) -> Result<String> {
    let result = executor
        .execute(
            "gh",
            &argv(&[
                "repo",
                "view",
                "--json",
                "nameWithOwner",
                "-q",
                ".nameWithOwner",
            ]),
        )
        .await;
    let output = result.success_stdout("Could not detect repository")?;
    let repo = output.trim().to_string();
    if repo.is_empty() {
        return Err(eyre!("Could not detect repository. Use --repo flag."));
    }
    Ok(repo)
}

async fn detect_branch(executor: &dyn CommandExecutor) -> Result<String> {
    let result = executor
        .execute("git", &argv(&["rev-parse", "--abbrev-ref", "HEAD"]))
        .await;
    let output = result.success_stdout("Failed to detect branch")?;
    Ok(output.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    if args.verbose {
        setup_verbose_logging()?;
    }

    let executor: Arc<dyn CommandExecutor> = Arc::new(RealExecutor::new());

    match args.command {
        Command::List => cmd_list(),
        Command::Chains => cmd_chains(),
        Command::Run {
            workflow,
            git_ref,
            inputs,
            watch,
        } => cmd_run(&executor, args.repo, workflow, git_ref, inputs, watch).await,
        Command::Chain {
            name,
            git_ref,
            variables,
            resume_from,
        } => cmd_chain(&executor, args.repo, name, git_ref, variables, resume_from).await,
        Command::Logs {
            run_id,
            workflow,
            errors_only,
            search,
            regex,
            step,
        } => cmd_logs(&executor, args.repo, run_id, workflow, errors_only, search, regex, step).await,
        Command::History { workflow, limit } => {
            cmd_history(&executor, args.repo, &workflow, limit).await
        }
    }
}

fn cmd_list() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let workflows = workflow::discover(&cwd)?;
    if workflows.is_empty() {
        println!("No dispatchable workflows found in .github/workflows/");
        return Ok(());
    }
    println!("Found {} dispatchable workflow(s):", workflows.len());
    for wf in &workflows {
        let name = if wf.name.is_empty() { "(unnamed)" } else { &wf.name };
        println!("  - {} ({})", wf.filename, name);
        for (key, input) in &wf.inputs {
            println!(
                "      {}: {} (type: {})",
                key,
                input.description,
                input.input_type.as_str()
            );
        }
    }
    Ok(())
}

fn cmd_chains() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let Some(file) = chain::config::load_chains_file(&cwd)? else {
        println!("No chains configured (.github/chains.yml not found)");
        return Ok(());
    };
    println!("Found {} chain(s):", file.chains.len());
    for (name, chain_def) in &file.chains {
        println!("  - {} ({} steps): {}", name, chain_def.steps.len(), chain_def.description);
        for (i, step) in chain_def.steps.iter().enumerate() {
            println!(
                "      {}. {} (wait_for: {:?}, on_failure: {:?})",
                i, step.workflow, step.wait_for, step.on_failure
            );
        }
    }
    Ok(())
}

async fn resolve_repo(executor: &Arc<dyn CommandExecutor>, repo: Option<String>) -> Result<String> {
    match repo {
        Some(repo) => Ok(repo),
        None => detect_repo(executor.as_ref()).await,
    }
}

async fn resolve_branch(
    executor: &Arc<dyn CommandExecutor>,
    git_ref: Option<String>,
) -> Result<String> {
    match git_ref {
        Some(git_ref) => Ok(git_ref),
        None => detect_branch(executor.as_ref()).await,
    }
}

async fn cmd_run(
    executor: &Arc<dyn CommandExecutor>,
    repo: Option<String>,
    workflow: String,
    git_ref: Option<String>,
    inputs: Vec<String>,
    watch: bool,
) -> Result<()> {
    check_gh_cli_available(executor.as_ref()).await?;
    let repo = resolve_repo(executor, repo).await?;
    let branch = resolve_branch(executor, git_ref).await?;
    let inputs: BTreeMap<String, String> = parse_key_values(&inputs)
        .map_err(|e| eyre!(e))?
        .into_iter()
        .collect();

    let client = Arc::new(GitHubClient::new(Arc::clone(executor), &repo)?);
    let runner = Runner::new(Arc::clone(executor));
    let cfg = RunConfig {
        workflow: workflow.clone(),
        branch: branch.clone(),
        inputs: inputs.clone(),
        watch,
    };

    let run_id = match runner.execute_and_get_run_id(&cfg, client.as_ref()).await {
        Ok(run_id) => {
            println!("Dispatched {workflow} on {branch} (run {run_id})");
            Some(run_id)
        }
        Err(e @ RunnerError::DispatchFailed { .. }) => {
            // A failed workflow dispatch is surfaced, not a process failure.
            println!("{e}");
            return Ok(());
        }
        Err(e) => {
            // Dispatch succeeded even though resolution did not.
            println!("Dispatched {workflow} but the run could not be resolved: {e}");
            None
        }
    };

    record_history(
        &repo,
        HistoryEntry {
            entry_type: EntryType::Workflow,
            workflow,
            chain_name: None,
            branch,
            inputs: inputs.into_iter().collect(),
            step_results: None,
            run_count: 1,
            last_run_at: chrono::Utc::now(),
        },
    );

    if let (Some(run_id), true) = (run_id, watch) {
        let watcher = Watcher::spawn(
            Arc::clone(&client) as Arc<dyn ActionsClient>,
            DEFAULT_POLL_INTERVAL,
        );
        watcher.watch(run_id, "run");
        while let Some(update) = watcher.recv().await {
            let terminal = update.run.status == RunStatus::Completed;
            render_event(&CoreEvent::Run(update));
            if terminal {
                break;
            }
        }
        watcher.stop();
    }
    Ok(())
}

async fn cmd_chain(
    executor: &Arc<dyn CommandExecutor>,
    repo: Option<String>,
    name: String,
    git_ref: Option<String>,
    variables: Vec<String>,
    resume_from: Option<usize>,
) -> Result<()> {
    check_gh_cli_available(executor.as_ref()).await?;
    let repo = resolve_repo(executor, repo).await?;
    let branch = resolve_branch(executor, git_ref).await?;

    let cwd = std::env::current_dir()?;
    let chains = chain::config::load_chains_file(&cwd)?
        .ok_or_else(|| eyre!("no chains configured (.github/chains.yml not found)"))?;
    let chain_def = chains
        .chains
        .get(&name)
        .cloned()
        .ok_or_else(|| eyre!("unknown chain {name:?}"))?;

    // Variable defaults, overridden by --var, with required ones enforced.
    let overrides: BTreeMap<String, String> = parse_key_values(&variables)
        .map_err(|e| eyre!(e))?
        .into_iter()
        .collect();
    let mut vars = BTreeMap::new();
    for decl in &chain_def.variables {
        let value = overrides
            .get(&decl.name)
            .cloned()
            .unwrap_or_else(|| decl.default.clone());
        if decl.required && value.is_empty() {
            return Err(eyre!("chain variable {:?} is required", decl.name));
        }
        vars.insert(decl.name.clone(), value);
    }
    for (key, value) in overrides {
        vars.entry(key).or_insert(value);
    }

    let client = Arc::new(GitHubClient::new(Arc::clone(executor), &repo)?);
    let watcher = Arc::new(Watcher::spawn(
        Arc::clone(&client) as Arc<dyn ActionsClient>,
        DEFAULT_POLL_INTERVAL,
    ));
    let runner = Arc::new(Runner::new(Arc::clone(executor)));
    let executor_chain = match resume_from {
        Some(resume_index) => {
            // Prior step results come from the most recent history entry
            // for this chain, so later templates still resolve.
            let store = FrecencyStore::load(paths::history_path());
            let previous: Vec<PreviousStepResult> = store
                .top_for_repo(&repo, "", usize::MAX)
                .into_iter()
                .find(|e| e.chain_name.as_deref() == Some(name.as_str()))
                .and_then(|e| e.step_results)
                .unwrap_or_default()
                .into_iter()
                .map(|r| PreviousStepResult {
                    workflow: r.workflow,
                    run_id: r.run_id,
                    status: r.status,
                    conclusion: r.conclusion,
                })
                .collect();
            if previous.len() < resume_index {
                return Err(eyre!(
                    "history records {} step result(s) for chain {name:?}, cannot resume at step {resume_index}",
                    previous.len()
                ));
            }
            ChainExecutor::new_from_history(
                Arc::clone(&client) as Arc<dyn ActionsClient>,
                Arc::clone(&watcher) as Arc<dyn RunWatcher>,
                runner,
                &name,
                chain_def,
                &previous,
                resume_index,
            )
        }
        None => ChainExecutor::new(
            Arc::clone(&client) as Arc<dyn ActionsClient>,
            Arc::clone(&watcher) as Arc<dyn RunWatcher>,
            runner,
            &name,
            chain_def,
        ),
    };

    let mut rx = executor_chain
        .updates()
        .ok_or_else(|| eyre!("chain updates already consumed"))?;
    executor_chain.start(vars.clone(), &branch)?;

    let mut final_state: Option<ChainState> = None;
    while let Some(update) = rx.recv().await {
        final_state = Some(update.state.clone());
        render_event(&CoreEvent::Chain(update));
    }
    watcher.stop();

    if let Some(state) = final_state {
        record_history(
            &repo,
            HistoryEntry {
                entry_type: EntryType::Chain,
                workflow: state
                    .step_results
                    .get(&0)
                    .map(|r| r.workflow.clone())
                    .unwrap_or_default(),
                chain_name: Some(name),
                branch: branch.clone(),
                inputs: vars.into_iter().collect(),
                step_results: Some(
                    state
                        .step_results
                        .values()
                        .map(|r| ChainStepResult {
                            workflow: r.workflow.clone(),
                            run_id: r.run_id,
                            status: r.status.as_str().to_string(),
                            conclusion: conclusion_str(r.conclusion).to_string(),
                        })
                        .collect(),
                ),
                run_count: 1,
                last_run_at: chrono::Utc::now(),
            },
        );

        // A failed chain is reported, not a process failure.
        if let Some(error) = &state.error {
            println!("chain error: {error}");
            println!("  hint: {}", error.suggestion());
            if let Some(url) = error.run_url() {
                println!("  run: {url}");
            }
            if let Some(failed_run_id) = error.run_id() {
                let fetcher = LogFetcher::new(
                    Arc::clone(&client) as Arc<dyn ActionsClient>,
                    Arc::clone(executor),
                );
                let chain_logs = fetcher.fetch_chain_logs(&state, &branch).await;
                let cache = LogCache::new(paths::log_cache_dir());
                if let Err(e) = cache.put(&state.chain_name, failed_run_id, &chain_logs, TTL_TERMINAL)
                {
                    tracing::warn!(error = %e, "log cache write failed");
                }
                let errors_only = LogFilter::new(FilterConfig {
                    level: FilterLevel::Errors,
                    ..FilterConfig::default()
                })?;
                let result = errors_only.apply(&chain_logs);
                for step_logs in &result.steps {
                    println!("── {} / {}", step_logs.job_name, step_logs.step_name);
                    for entry in &step_logs.entries {
                        println!("{}", entry.original.content);
                    }
                }
            }
        }
    }
    Ok(())
}

/// The headless counterpart of the UI's event pump: every emitter stream is
/// multiplexed through [`CoreEvent`] and rendered from one place.
fn render_event(event: &CoreEvent) {
    match event {
        CoreEvent::Run(update) => println!(
            "  {} {}",
            update.run.status.as_str(),
            conclusion_str(update.run.conclusion)
        ),
        CoreEvent::Chain(update) => print_chain_progress(&update.state),
        CoreEvent::Stream(update) => {
            for entry in &update.new_entries {
                println!("{}", entry.content);
            }
        }
    }
}

fn print_chain_progress(state: &ChainState) {
    let steps: Vec<String> = state
        .step_statuses
        .iter()
        .map(|status| {
            match status {
                StepStatus::Pending => "·",
                StepStatus::Running => "▸",
                StepStatus::Waiting => "◌",
                StepStatus::Completed => "✓",
                StepStatus::Failed => "✗",
                StepStatus::Skipped => "⊘",
            }
            .to_string()
        })
        .collect();
    println!("[{}] {:?}", steps.join(" "), state.status);
    if state.status == ChainStatus::Completed {
        println!("chain {} completed", state.chain_name);
    }
}

async fn cmd_logs(
    executor: &Arc<dyn CommandExecutor>,
    repo: Option<String>,
    run_id: i64,
    workflow: String,
    errors_only: bool,
    search: String,
    regex: bool,
    step: i32,
) -> Result<()> {
    check_gh_cli_available(executor.as_ref()).await?;
    let repo = resolve_repo(executor, repo).await?;
    let client = Arc::new(GitHubClient::new(Arc::clone(executor), &repo)?);

    let run = client.get_workflow_run(run_id).await?;
    if run.is_active() {
        // Stream deltas until the run completes instead of fetching once.
        println!("run {run_id} is {}; streaming logs", run.status.as_str());
        let fetcher = Arc::new(LogFetcher::new(
            Arc::clone(&client) as Arc<dyn ActionsClient>,
            Arc::clone(executor),
        ));
        let (streamer, mut updates) = LogStreamer::spawn(
            Arc::clone(&client) as Arc<dyn ActionsClient>,
            fetcher,
            run_id,
            &workflow,
            DEFAULT_STREAM_INTERVAL,
        );
        while let Some(update) = updates.recv().await {
            let terminal = update.terminal;
            render_event(&CoreEvent::Stream(update));
            if terminal {
                break;
            }
        }
        streamer.stop();
        return Ok(());
    }

    let cache = LogCache::new(paths::log_cache_dir());
    let run_logs = match cache.get("", run_id) {
        Some(cached) => cached,
        None => {
            let fetcher = LogFetcher::new(
                Arc::clone(&client) as Arc<dyn ActionsClient>,
                Arc::clone(executor),
            );
            let steps = fetcher.fetch_step_logs(run_id, &workflow).await?;
            let mut logs = ghd::logs::RunLogs::new("", "");
            for step_logs in steps {
                logs.add_step(step_logs);
            }
            let ttl = if run.is_active() { TTL_ACTIVE } else { TTL_TERMINAL };
            if let Err(e) = cache.put("", run_id, &logs, ttl) {
                tracing::warn!(error = %e, "log cache write failed");
            }
            logs
        }
    };

    let filter = LogFilter::new(FilterConfig {
        level: if errors_only {
            FilterLevel::Errors
        } else {
            FilterLevel::All
        },
        search_term: search,
        case_sensitive: false,
        regex,
        step_index: step,
    })?;
    let result = filter.apply(&run_logs);

    if result.steps.is_empty() {
        println!("No matching log entries for run {run_id}");
        return Ok(());
    }
    for step_logs in &result.steps {
        println!("── {} / {}", step_logs.job_name, step_logs.step_name);
        for entry in &step_logs.entries {
            println!("{}", entry.original.content);
        }
    }
    Ok(())
}

async fn cmd_history(
    executor: &Arc<dyn CommandExecutor>,
    repo: Option<String>,
    workflow: &str,
    limit: usize,
) -> Result<()> {
    let repo = resolve_repo(executor, repo).await?;
    let store = FrecencyStore::load(paths::history_path());
    let entries = store.top_for_repo(&repo, workflow, limit);
    if entries.is_empty() {
        println!("No run history for {repo}");
        return Ok(());
    }
    for entry in entries {
        let label = match (&entry.entry_type, &entry.chain_name) {
            (EntryType::Chain, Some(chain_name)) => format!("chain {chain_name}"),
            _ => entry.workflow.clone(),
        };
        println!(
            "{:>4}x  {}  on {}  (last {})",
            entry.run_count,
            label,
            entry.branch,
            entry.last_run_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn record_history(repo: &str, entry: HistoryEntry) {
    let mut store = FrecencyStore::load(paths::history_path());
    store.record(repo, entry);
    if let Err(e) = store.save() {
        tracing::warn!(error = %e, "history save failed");
    }
}
