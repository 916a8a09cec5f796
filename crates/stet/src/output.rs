use owo_colors::{OwoColorize, Stream};
use serde::Serialize;
use stet_core::stats::HistoryStats;
use stet_core::types::{Finding, Severity};
use stet_core::{RunSummary, SessionStatus, StetError};

pub fn print_error(err: &StetError) {
    eprintln!(
        "{} {err}",
        "error:".if_supports_color(Stream::Stderr, |text| text.red())
    );
    if let Some(hint) = hint(err) {
        eprintln!("  {hint}");
    }
}

fn hint(err: &StetError) -> Option<&'static str> {
    match err {
        StetError::SessionLocked => Some("another run is active; wait for it to finish"),
        StetError::DirtyWorktree => Some("commit or stash your changes, or pass --allow-dirty"),
        StetError::InvalidRef { .. } => Some("check the ref with `git rev-parse`"),
        StetError::BaselineNotAncestor { .. } => {
            Some("pick a baseline on the current branch's history")
        }
        StetError::WorktreeExists { .. } => {
            Some("run `stet finish` or `stet cleanup`, or remove the worktree")
        }
        StetError::Unreachable { .. } => Some("is the model server running? try `ollama serve`"),
        StetError::Review { source, .. } => hint(source),
        _ => None,
    }
}

/// Human summary on stderr; stdout carries the event stream.
pub fn print_summary(summary: &RunSummary) {
    eprintln!(
        "reviewed {} hunks ({} approved), {} findings",
        summary.hunks_reviewed,
        summary.hunks_approved,
        summary.findings.len()
    );
    if !summary.auto_dismissed.is_empty() {
        eprintln!(
            "{} findings addressed and auto-dismissed",
            summary.auto_dismissed.len()
        );
    }
}

pub fn print_status(status: &SessionStatus) {
    println!("session   {}", status.session_id);
    println!("baseline  {}", status.baseline_ref);
    if !status.last_reviewed_at.is_empty() {
        println!("reviewed  {}", status.last_reviewed_at);
    }
    println!(
        "findings  {} active, {} dismissed",
        status.active_findings, status.dismissed_findings
    );
    println!("strictness {}", status.options.strictness);
    if let Some(path) = &status.worktree_path {
        println!("worktree  {}", path.display());
    }
}

pub fn print_findings(findings: &[Finding]) {
    if findings.is_empty() {
        println!("no active findings");
        return;
    }
    for finding in findings {
        let id = &finding.id[..finding.id.len().min(8)];
        println!(
            "{} {:<7} {}:{} {}",
            id.if_supports_color(Stream::Stdout, |text| text.dimmed()),
            severity_label(finding.severity),
            finding.file,
            finding.effective_line(),
            finding.message
        );
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
        Severity::Nitpick => "nitpick",
    }
}

pub fn print_stats(stats: &HistoryStats) {
    println!("runs              {}", stats.runs);
    println!("findings emitted  {}", stats.findings_emitted);
    println!("sessions finished {}", stats.sessions_finished);
    println!("dismissals        {}", stats.dismissals());
    for (reason, count) in &stats.dismissals_by_reason {
        println!("  {reason:<16}{count}");
    }
    println!(
        "tokens            {} prompt, {} completion",
        stats.prompt_tokens, stats.completion_tokens
    );
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), StetError> {
    let json = serde_json::to_string_pretty(value).map_err(|err| StetError::Internal {
        message: format!("encode output: {err}"),
    })?;
    println!("{json}");
    Ok(())
}
