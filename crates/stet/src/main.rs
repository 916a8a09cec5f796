mod output;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use stet_core::types::{DismissReason, Strictness};
use stet_core::{Config, Reviewer, RunOptions, StartOptions, StetError};
use stet_events::NdjsonSink;
use stet_llm::OllamaClient;
use stet_store::FileStore;
use stet_vcs::{GitCli, VcsBackend};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stet", version, about = "Incremental local code review")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a session against a baseline and review everything since it.
    Start {
        /// Baseline ref; defaults to HEAD~1.
        baseline: Option<String>,
        #[arg(long)]
        allow_dirty: bool,
        /// Skip the model and emit one canned finding per hunk.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        strictness: Option<Strictness>,
        #[arg(long)]
        nitpicky: bool,
    },
    /// Review commits added since the last run.
    Run {
        #[arg(long)]
        dry_run: bool,
        /// Re-review every hunk since the baseline.
        #[arg(long)]
        force: bool,
        /// Replace the finding list instead of merging into it.
        #[arg(long)]
        replace: bool,
    },
    /// Record the session as a git note and remove its worktree.
    Finish,
    Dismiss {
        /// Finding IDs or unique prefixes.
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, default_value = "false_positive")]
        reason: DismissReason,
    },
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Active findings.
    List {
        #[arg(long)]
        json: bool,
    },
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Remove stale stet worktrees.
    Cleanup,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted");
            interrupt.cancel();
        }
    });

    match execute(cli.command, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output::print_error(&err);
            if err.is_cancelled() {
                ExitCode::from(130)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STET_LOG")
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn execute(command: Command, cancel: &CancellationToken) -> Result<(), StetError> {
    let reviewer = open_reviewer(cancel)?;
    match command {
        Command::Start {
            baseline,
            allow_dirty,
            dry_run,
            strictness,
            nitpicky,
        } => {
            let reviewer = reviewer.with_sink(Arc::new(NdjsonSink::new(std::io::stdout())));
            let options = StartOptions {
                baseline: baseline.unwrap_or_default(),
                allow_dirty,
                dry_run,
                strictness,
                nitpicky: nitpicky.then_some(true),
            };
            let summary = reviewer.start(options, cancel).await?;
            output::print_summary(&summary);
        }
        Command::Run {
            dry_run,
            force,
            replace,
        } => {
            let reviewer = reviewer.with_sink(Arc::new(NdjsonSink::new(std::io::stdout())));
            let options = RunOptions {
                dry_run,
                force_full_review: force,
                replace,
            };
            let summary = reviewer.run(options, cancel).await?;
            output::print_summary(&summary);
        }
        Command::Finish => {
            let note = reviewer.finish().await?;
            eprintln!(
                "finished session {} ({} findings, {} dismissed)",
                note.session_id, note.findings_count, note.dismissals_count
            );
        }
        Command::Dismiss { ids, reason } => {
            for id in reviewer.dismiss(&ids, reason)? {
                println!("dismissed {id} ({})", reason.as_str());
            }
        }
        Command::Status { json } => match reviewer.status()? {
            Some(status) if json => output::print_json(&status)?,
            Some(status) => output::print_status(&status),
            None => println!("no active review session"),
        },
        Command::List { json } => {
            let findings = reviewer.list()?;
            if json {
                output::print_json(&findings)?;
            } else {
                output::print_findings(&findings);
            }
        }
        Command::Stats { json } => {
            let stats = reviewer.stats()?;
            if json {
                output::print_json(&stats)?;
            } else {
                output::print_stats(&stats);
            }
        }
        Command::Cleanup => {
            for path in reviewer.cleanup().await? {
                println!("removed {}", path.display());
            }
        }
    }
    Ok(())
}

fn open_reviewer(cancel: &CancellationToken) -> Result<Reviewer<FileStore>, StetError> {
    let cwd = std::env::current_dir()
        .map_err(|err| StetError::config(format!("current directory: {err}")))?;
    let git = GitCli::open(&cwd)?.with_cancel(cancel.clone());
    let root = git.root().to_path_buf();
    let config = Config::load(&root)?;
    let store = FileStore::new(config.state_dir(&root))
        .with_history_max_records(config.history_max_records);
    let client = OllamaClient::new(
        config.ollama_base_url.clone(),
        Duration::from_secs(config.timeout_secs),
    )?;
    tracing::debug!(root = %root.display(), model = %config.model, "opened repository");
    Ok(Reviewer::new(config, store, Arc::new(git), Arc::new(client)))
}
