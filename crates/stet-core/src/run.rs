//! Session lifecycle: start, incremental run, dismiss, finish.

use crate::config::Config;
use crate::critic::CriticConfig;
use crate::diff::{count_hunk_scope, hunk_line_range};
use crate::error::StetError;
use crate::expand::AstRegistry;
use crate::partition::{diff_hunks, partition};
use crate::pipeline::{PipelineOutput, PipelineSettings, ReviewPipeline};
use crate::prepare::{PrepareLimits, PromptPreparer};
use crate::prompt::{UserIntent, build_system_base};
use crate::rules::RuleLoader;
use crate::scope::ScopeFilter;
use crate::stats::{HistoryStats, aggregate};
use crate::store::{HistoryRepository, SessionRepository, Store};
use crate::suppression::collect_examples;
use crate::symbols::SymbolRegistry;
use crate::types::{
    DismissReason, Dismissal, Finding, HistoryRecord, Hunk, HunkScope, LineRange, NOTES_REF,
    NoteBody, PinnedOptions, RunConfig, Session, Strictness, Usage, UserAction,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stet_events::{Event, EventSink};
use stet_llm::{GenerateOptions, ModelClient};
use stet_vcs::{VcsBackend, VcsError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Ref the review is measured against; `HEAD~1` when empty.
    pub baseline: String,
    pub allow_dirty: bool,
    pub dry_run: bool,
    pub strictness: Option<Strictness>,
    pub nitpicky: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Review every hunk since the baseline, ignoring earlier approvals and
    /// dismissals.
    pub force_full_review: bool,
    /// Overwrite the finding list instead of merging into it.
    pub replace: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub session_id: String,
    pub baseline: String,
    pub head: String,
    pub hunks_reviewed: usize,
    pub hunks_approved: usize,
    pub findings: Vec<Finding>,
    pub auto_dismissed: Vec<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub baseline_ref: String,
    pub last_reviewed_at: String,
    pub active_findings: usize,
    pub dismissed_findings: usize,
    pub worktree_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub options: PinnedOptions,
}

/// Drives review sessions for one repository.
pub struct Reviewer<S: Store> {
    repo_root: PathBuf,
    config: Config,
    store: S,
    vcs: Arc<dyn VcsBackend>,
    client: Arc<dyn ModelClient>,
    ast: AstRegistry,
    symbols: SymbolRegistry,
    sink: Option<Arc<dyn EventSink>>,
}

impl<S: Store> Reviewer<S> {
    pub fn new(
        config: Config,
        store: S,
        vcs: Arc<dyn VcsBackend>,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            repo_root: vcs.root().to_path_buf(),
            config,
            store,
            vcs,
            client,
            ast: AstRegistry::builtin(),
            symbols: SymbolRegistry::builtin(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_registries(mut self, ast: AstRegistry, symbols: SymbolRegistry) -> Self {
        self.ast = ast;
        self.symbols = symbols;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn emit(&self, event: Event) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn warn(&self, message: String) {
        tracing::warn!("{message}");
        self.emit(Event::warning(message));
    }

    /// Opens a session at `options.baseline`, creates the baseline worktree
    /// and reviews everything up to HEAD.
    pub async fn start(
        &self,
        options: StartOptions,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, StetError> {
        let _lock = self.store.acquire_lock()?;
        let sessions = self.store.sessions();
        if sessions.load()?.is_started() {
            return Err(StetError::config(
                "a review session is already active; run `stet finish` first",
            ));
        }

        let baseline_ref = if options.baseline.trim().is_empty() {
            "HEAD~1"
        } else {
            options.baseline.trim()
        };
        let baseline = self.vcs.rev_parse(baseline_ref).await?;
        let head = self.vcs.rev_parse("HEAD").await?;
        if !self.vcs.is_ancestor(&baseline, &head).await? {
            return Err(StetError::BaselineNotAncestor {
                baseline: baseline_ref.to_string(),
            });
        }

        let mut session = Session {
            session_id: new_session_id(),
            baseline_ref: baseline.clone(),
            options: self.pinned_options(&options),
            started_at: Some(Utc::now()),
            ..Session::default()
        };
        let mut summary = RunSummary {
            session_id: session.session_id.clone(),
            baseline: baseline.clone(),
            head: head.clone(),
            ..RunSummary::default()
        };

        if baseline == head {
            session.last_reviewed_at = head;
            sessions.save(&session)?;
            self.emit(Event::Done);
            return Ok(summary);
        }

        match self.vcs.ensure_clean().await {
            Ok(()) => {}
            Err(VcsError::DirtyWorkingCopy) if options.allow_dirty => {
                self.warn("working tree has uncommitted changes; reviewing committed state only".to_string());
            }
            Err(err) => return Err(err.into()),
        }

        if !options.dry_run {
            self.client.check(&self.config.model, cancel).await?;
        }

        let path = stet_vcs::git::worktree_path(&self.config.worktree_root(&self.repo_root), &baseline);
        let worktree = self.vcs.worktree_add(&path, &baseline).await?;
        session.worktree_path = Some(worktree.path.clone());

        let reviewed = self
            .first_review(&mut session, &mut summary, options.dry_run, cancel)
            .await;
        let output = match reviewed {
            Ok(output) => output,
            Err(err) => {
                self.remove_worktree(&worktree.path).await;
                return Err(err);
            }
        };

        tracing::info!(
            session = %session.session_id,
            findings = output.findings.len(),
            "review session started"
        );
        self.emit(Event::Done);
        summary.findings = output.findings;
        summary.usage = output.usage;
        Ok(summary)
    }

    /// Reviews the commits added since the last run.
    pub async fn run(
        &self,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, StetError> {
        let _lock = self.store.acquire_lock()?;
        let sessions = self.store.sessions();
        let mut session = load_started(&sessions)?;

        let head = self.vcs.rev_parse("HEAD").await?;
        let baseline = session.baseline_ref.clone();
        let mut summary = RunSummary {
            session_id: session.session_id.clone(),
            baseline: baseline.clone(),
            head: head.clone(),
            ..RunSummary::default()
        };

        let unchanged = session.last_reviewed_at == head && !options.force_full_review;
        if baseline == head || unchanged {
            session.last_reviewed_at = head;
            sessions.save(&session)?;
            self.emit(Event::Done);
            return Ok(summary);
        }

        let last_reviewed = if options.force_full_review || session.last_reviewed_at.is_empty() {
            None
        } else {
            match self.vcs.is_ancestor(&session.last_reviewed_at, &head).await {
                Ok(true) => Some(session.last_reviewed_at.clone()),
                Err(VcsError::Cancelled) => return Err(StetError::Cancelled),
                Ok(false) | Err(_) => {
                    self.warn(format!(
                        "last reviewed commit {} is no longer an ancestor of HEAD; reviewing all changes",
                        short(&session.last_reviewed_at)
                    ));
                    None
                }
            }
        };

        if !options.dry_run {
            self.client.check(&self.config.model, cancel).await?;
        }

        let scope = ScopeFilter::new(self.config.exclude_patterns.as_deref());
        let parts = partition(
            self.vcs.as_ref(),
            &scope,
            &baseline,
            &head,
            last_reviewed.as_deref(),
        )
        .await?;
        summary.hunks_approved = parts.approved.len();

        let to_review = if options.force_full_review {
            parts.to_review
        } else {
            skip_dismissed(&session, parts.to_review)
        };
        summary.hunks_reviewed = to_review.len();

        if to_review.is_empty() {
            session.last_reviewed_at = head;
            sessions.save(&session)?;
            self.emit(Event::Done);
            return Ok(summary);
        }

        self.emit(Event::progress(format!(
            "reviewing {} hunks ({} already approved)",
            to_review.len(),
            summary.hunks_approved
        )));
        let reviewed_ranges = hunk_ranges(&to_review);
        let output = self
            .review(&session, to_review, options.dry_run, cancel)
            .await?;

        if !options.replace {
            let addressed = addressed_findings(&session, &output.findings, &reviewed_ranges);
            if !addressed.is_empty() {
                let record = HistoryRecord {
                    diff_ref: head.clone(),
                    user_action: UserAction {
                        dismissed_ids: addressed.clone(),
                        dismissals: addressed
                            .iter()
                            .map(|id| Dismissal {
                                finding_id: id.clone(),
                                reason: DismissReason::AlreadyCorrect,
                            })
                            .collect(),
                        ..UserAction::default()
                    },
                    ..HistoryRecord::default()
                };
                self.append_history(&record)?;
                for id in &addressed {
                    session.dismiss(id);
                }
                tracing::info!(count = addressed.len(), "auto-dismissed addressed findings");
            }
            summary.auto_dismissed = addressed;
        }

        let record = self.run_record(&head, &session, &output, options.replace);
        self.append_history(&record)?;

        if options.replace {
            session.findings = output.findings.clone();
            session.dismissed_ids.clear();
            session.finding_prompt_context = output.prompt_context;
        } else {
            for finding in &output.findings {
                if !session.findings.iter().any(|existing| existing.id == finding.id) {
                    session.findings.push(finding.clone());
                }
            }
            session.finding_prompt_context.extend(output.prompt_context);
        }
        session.last_reviewed_at = head;
        if self.config.capture_usage {
            session.last_run = Some(output.usage.clone());
        }
        sessions.save(&session)?;

        self.emit(Event::Done);
        summary.findings = output.findings;
        summary.usage = output.usage;
        Ok(summary)
    }

    /// Records the session as a git note at HEAD and tears it down.
    pub async fn finish(&self) -> Result<NoteBody, StetError> {
        let _lock = self.store.acquire_lock()?;
        let sessions = self.store.sessions();
        let session = load_started(&sessions)?;
        let head = self.vcs.rev_parse("HEAD").await?;

        let scope = if session.baseline_ref == head {
            HunkScope::default()
        } else {
            let filter = ScopeFilter::new(self.config.exclude_patterns.as_deref());
            let hunks =
                diff_hunks(self.vcs.as_ref(), &filter, &session.baseline_ref, &head).await?;
            count_hunk_scope(&hunks)
        };

        let usage = session
            .last_run
            .as_ref()
            .filter(|_| self.config.capture_usage);
        let note = NoteBody {
            session_id: session.session_id.clone(),
            baseline_sha: session.baseline_ref.clone(),
            head_sha: head.clone(),
            findings_count: session.findings.len() as u64,
            dismissals_count: session.dismissed_ids.len() as u64,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            finished_at: Utc::now(),
            hunks_reviewed: scope.hunks_reviewed,
            lines_added: scope.lines_added,
            lines_removed: scope.lines_removed,
            chars_added: scope.chars_added,
            chars_deleted: scope.chars_deleted,
            chars_reviewed: scope.chars_reviewed,
            model: usage
                .map(|u| u.model.clone())
                .filter(|model| !model.is_empty()),
            prompt_tokens: usage.map(|u| u.prompt_tokens),
            completion_tokens: usage.map(|u| u.completion_tokens),
            eval_duration_ns: usage.map(|u| u.eval_duration_ns),
        };
        let body = serde_json::to_string(&note).map_err(|err| StetError::Internal {
            message: format!("encode note: {err}"),
        })?;
        self.vcs
            .note_add(NOTES_REF, &head, &body)
            .await
            .map_err(|err| StetError::Note {
                reason: err.to_string(),
            })?;

        self.append_history(&HistoryRecord {
            diff_ref: head,
            user_action: UserAction {
                finished_at: Some(note.finished_at),
                ..UserAction::default()
            },
            ..HistoryRecord::default()
        })?;

        if let Some(path) = &session.worktree_path {
            self.remove_worktree(path).await;
        }
        sessions.delete()?;
        tracing::info!(session = %note.session_id, "review session finished");
        Ok(note)
    }

    /// Dismisses findings by full ID or unique prefix. Returns the resolved
    /// IDs in the order given.
    pub fn dismiss(&self, ids: &[String], reason: DismissReason) -> Result<Vec<String>, StetError> {
        let _lock = self.store.acquire_lock()?;
        let sessions = self.store.sessions();
        let mut session = load_started(&sessions)?;

        let resolved = ids
            .iter()
            .map(|id| resolve_finding_id(&session, id))
            .collect::<Result<Vec<_>, _>>()?;

        for id in &resolved {
            if session.dismiss(id) {
                session.add_shadow(id);
            }
        }
        self.append_history(&HistoryRecord {
            diff_ref: session.last_reviewed_at.clone(),
            user_action: UserAction {
                dismissed_ids: resolved.clone(),
                dismissals: resolved
                    .iter()
                    .map(|id| Dismissal {
                        finding_id: id.clone(),
                        reason,
                    })
                    .collect(),
                ..UserAction::default()
            },
            ..HistoryRecord::default()
        })?;
        sessions.save(&session)?;
        Ok(resolved)
    }

    pub fn status(&self) -> Result<Option<SessionStatus>, StetError> {
        let session = self.store.sessions().load()?;
        if !session.is_started() {
            return Ok(None);
        }
        Ok(Some(SessionStatus {
            active_findings: session.active_findings().count(),
            dismissed_findings: session.dismissed_findings().count(),
            session_id: session.session_id,
            baseline_ref: session.baseline_ref,
            last_reviewed_at: session.last_reviewed_at,
            worktree_path: session.worktree_path,
            started_at: session.started_at,
            options: session.options,
        }))
    }

    pub fn list(&self) -> Result<Vec<Finding>, StetError> {
        let session = self.store.sessions().load()?;
        Ok(session.active_findings().cloned().collect())
    }

    pub fn stats(&self) -> Result<HistoryStats, StetError> {
        let records = self.store.history().read_records()?;
        Ok(aggregate(&records))
    }

    /// Removes `stet-*` worktrees left behind under the worktree root, keeping
    /// the active session's.
    pub async fn cleanup(&self) -> Result<Vec<PathBuf>, StetError> {
        let _lock = self.store.acquire_lock()?;
        let active = self.store.sessions().load()?.worktree_path;
        let root = canonical(&self.config.worktree_root(&self.repo_root));
        let active = active.as_deref().map(canonical);

        let mut removed = Vec::new();
        for worktree in self.vcs.worktree_list().await? {
            let path = canonical(&worktree.path);
            let is_stet = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("stet-"));
            if !is_stet || path.parent() != Some(root.as_path()) {
                continue;
            }
            if active.as_ref() == Some(&path) {
                continue;
            }
            match self.vcs.worktree_remove(&worktree.path).await {
                Ok(()) => removed.push(worktree.path),
                Err(err) => {
                    tracing::warn!(path = %worktree.path.display(), error = %err, "failed to remove stale worktree");
                }
            }
        }
        Ok(removed)
    }

    /// Full review of a freshly opened session; persists it on success.
    async fn first_review(
        &self,
        session: &mut Session,
        summary: &mut RunSummary,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, StetError> {
        let head = summary.head.clone();
        let scope = ScopeFilter::new(self.config.exclude_patterns.as_deref());
        let parts = partition(self.vcs.as_ref(), &scope, &summary.baseline, &head, None).await?;
        summary.hunks_reviewed = parts.to_review.len();
        self.emit(Event::progress(format!(
            "reviewing {} hunks between {} and {}",
            parts.to_review.len(),
            short(&summary.baseline),
            short(&head)
        )));

        let output = self.review(session, parts.to_review, dry_run, cancel).await?;

        let record = self.run_record(&head, session, &output, false);
        self.append_history(&record)?;
        session.findings = output.findings.clone();
        session.finding_prompt_context = output.prompt_context.clone();
        session.last_reviewed_at = head;
        if self.config.capture_usage {
            session.last_run = Some(output.usage.clone());
        }
        self.store.sessions().save(session)?;
        Ok(output)
    }

    async fn remove_worktree(&self, path: &Path) {
        if let Err(err) = self.vcs.worktree_remove(path).await {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove baseline worktree");
        }
    }

    fn pinned_options(&self, options: &StartOptions) -> PinnedOptions {
        PinnedOptions {
            strictness: options.strictness.unwrap_or(self.config.strictness),
            nitpicky: options.nitpicky.unwrap_or(self.config.nitpicky),
            context_limit: self.config.context_limit,
            num_ctx: self.config.num_ctx,
            rag_symbol_max_definitions: self.config.rag_symbol_max_definitions,
            rag_symbol_max_tokens: self.config.rag_symbol_max_tokens,
        }
    }

    async fn review(
        &self,
        session: &Session,
        hunks: Vec<Hunk>,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, StetError> {
        let pinned = &session.options;
        let intent = UserIntent {
            branch: self.vcs.current_branch().await.unwrap_or_default(),
            commit_message: self.vcs.commit_subject("HEAD").await.unwrap_or_default(),
        };
        let system_base = build_system_base(
            self.store.state_dir(),
            &intent,
            &session.prompt_shadows,
            pinned.nitpicky,
        );

        let mut rules = RuleLoader::new(&self.repo_root);
        let rules_by_file = rules.preload(hunks.iter().map(|hunk| hunk.file_path.as_str()));

        let suppression = if self.config.suppression_enabled {
            match self.store.history().read_records() {
                Ok(records) => collect_examples(&records, self.config.suppression_history_count),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read history for suppression examples");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let context_limit = if pinned.context_limit == 0 {
            self.config.context_limit
        } else {
            pinned.context_limit
        };
        let preparer = PromptPreparer {
            repo_root: self.repo_root.clone(),
            vcs: Arc::clone(&self.vcs),
            ast: self.ast.clone(),
            symbols: self.symbols.clone(),
            system_base,
            rules_by_file,
            suppression,
            limits: PrepareLimits {
                expand_max_tokens: (context_limit / 4) as usize,
                rules_max_tokens: self.config.rules_max_tokens,
                symbol_max_definitions: pinned.rag_symbol_max_definitions,
                symbol_max_tokens: pinned.rag_symbol_max_tokens,
                call_graph: true,
            },
        };

        let options = GenerateOptions {
            temperature: self.config.temperature,
            num_ctx: if pinned.num_ctx == 0 {
                self.config.num_ctx
            } else {
                pinned.num_ctx
            },
        };
        let settings = PipelineSettings {
            model: self.config.model.clone(),
            options: options.clone(),
            concurrency: self.config.concurrency,
            prepare_buffer_size: self.config.prepare_buffer_size,
            thresholds: self.config.thresholds(pinned.strictness, pinned.nitpicky),
            critic: CriticConfig {
                enabled: self.config.critic_enabled,
                model: self.config.critic_model.clone(),
                options,
            },
            dry_run,
            context_limit,
            warn_threshold: self.config.warn_threshold,
        };

        ReviewPipeline::new(Arc::new(preparer), Arc::clone(&self.client), settings)
            .run(hunks, self.sink.as_deref(), cancel)
            .await
    }

    fn run_record(
        &self,
        head: &str,
        session: &Session,
        output: &PipelineOutput,
        replace: bool,
    ) -> HistoryRecord {
        HistoryRecord {
            diff_ref: head.to_string(),
            review_output: output.findings.clone(),
            user_action: UserAction {
                replace_findings: replace.then_some(true),
                ..UserAction::default()
            },
            run_config: Some(RunConfig {
                model: self.config.model.clone(),
                strictness: session.options.strictness,
                rag_symbol_max_definitions: session.options.rag_symbol_max_definitions,
                rag_symbol_max_tokens: session.options.rag_symbol_max_tokens,
                nitpicky: session.options.nitpicky,
            }),
            usage: self
                .config
                .capture_usage
                .then(|| output.usage.clone()),
        }
    }

    fn append_history(&self, record: &HistoryRecord) -> Result<(), StetError> {
        self.store
            .history()
            .append(record)
            .map_err(|err| StetError::History {
                message: err.to_string(),
            })
    }
}

fn load_started<R: SessionRepository>(sessions: &R) -> Result<Session, StetError> {
    let session = sessions.load()?;
    if !session.is_started() {
        return Err(StetError::config(
            "no active review session; run `stet start` first",
        ));
    }
    Ok(session)
}

fn new_session_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(12)]
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn hunk_ranges(hunks: &[Hunk]) -> Vec<(String, LineRange)> {
    hunks
        .iter()
        .filter_map(|hunk| {
            hunk_line_range(&hunk.raw_content).map(|range| (hunk.file_path.clone(), range))
        })
        .collect()
}

/// Drops hunks that overlap a dismissed finding in the same file.
fn skip_dismissed(session: &Session, hunks: Vec<Hunk>) -> Vec<Hunk> {
    let dismissed: Vec<&Finding> = session.dismissed_findings().collect();
    if dismissed.is_empty() {
        return hunks;
    }
    hunks
        .into_iter()
        .filter(|hunk| {
            let Some(range) = hunk_line_range(&hunk.raw_content) else {
                return true;
            };
            let hit = dismissed
                .iter()
                .any(|finding| finding.file == hunk.file_path && finding.location().overlaps(&range));
            if hit {
                tracing::debug!(file = %hunk.file_path, "skipping hunk with dismissed finding");
            }
            !hit
        })
        .collect()
}

/// Active findings that were not re-reported although their location was
/// reviewed again, in session order.
fn addressed_findings(
    session: &Session,
    new_findings: &[Finding],
    reviewed: &[(String, LineRange)],
) -> Vec<String> {
    let new_ids: HashSet<&str> = new_findings.iter().map(|f| f.id.as_str()).collect();
    let mut addressed = Vec::new();
    for finding in session.active_findings() {
        if new_ids.contains(finding.id.as_str()) || addressed.contains(&finding.id) {
            continue;
        }
        let location = finding.location();
        let covered = reviewed.iter().any(|(file, range)| {
            *file == finding.file && range.contains(location.start) && range.contains(location.end)
        });
        if covered {
            addressed.push(finding.id.clone());
        }
    }
    addressed
}

fn resolve_finding_id(session: &Session, id: &str) -> Result<String, StetError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(StetError::config("empty finding id"));
    }
    if session.findings.iter().any(|finding| finding.id == id) {
        return Ok(id.to_string());
    }
    let mut matches = session
        .findings
        .iter()
        .filter(|finding| finding.id.starts_with(id))
        .map(|finding| finding.id.as_str());
    match (matches.next(), matches.next()) {
        (Some(found), None) => Ok(found.to_string()),
        (Some(_), Some(_)) => Err(StetError::config(format!(
            "finding id prefix {id} is ambiguous"
        ))),
        (None, _) => Err(StetError::config(format!("unknown finding id: {id}"))),
    }
}
