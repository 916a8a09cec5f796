use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use stet_core::config::Config;
use stet_core::pipeline::DRY_RUN_MESSAGE;
use stet_core::store::{HistoryRepository, SESSION_FILE, SessionRepository, Store};
use stet_core::types::{Category, DismissReason, NOTES_REF, NoteBody, Severity};
use stet_core::{Reviewer, RunOptions, StartOptions, StetError};
use stet_events::{CollectingSink, Event, EventSink};
use stet_llm::{GenerateRequest, GenerateResponse, KeepAlive, LlmError, ModelClient};
use stet_store::FileStore;
use stet_vcs::{GitCli, VcsBackend};
use tokio_util::sync::CancellationToken;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo(dir: &Path) -> String {
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    commit(dir, &[("README", "readme\n")], "root")
}

fn commit(dir: &Path, files: &[(&str, &str)], message: &str) -> String {
    for (name, contents) in files {
        std::fs::write(dir.join(name), contents).unwrap();
        git(dir, &["add", name]);
    }
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Replays canned responses in order; `[]` once the script runs out.
#[derive(Default)]
struct FakeClient {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl FakeClient {
    fn scripted(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| (*r).to_string()).collect()),
            requests: Mutex::default(),
        })
    }

    fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for FakeClient {
    async fn check(&self, _model: &str, _cancel: &CancellationToken) -> Result<(), LlmError> {
        Ok(())
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "[]".to_string());
        let mut response = GenerateResponse::text(next);
        response.prompt_eval_count = 10;
        response.eval_count = 2;
        Ok(response)
    }
}

/// Cancels `token` as soon as the first finding is emitted.
struct CancelOnFinding {
    token: CancellationToken,
}

impl EventSink for CancelOnFinding {
    fn emit(&self, event: Event) {
        if matches!(event, Event::Finding { .. }) {
            self.token.cancel();
        }
    }
}

fn reviewer(dir: &Path, config: Config, client: Arc<FakeClient>) -> Reviewer<FileStore> {
    let cli = GitCli::open(dir).unwrap();
    let store = FileStore::new(config.state_dir(cli.root()))
        .with_history_max_records(config.history_max_records);
    Reviewer::new(config, store, Arc::new(cli), client)
}

fn history_len(reviewer: &Reviewer<FileStore>) -> usize {
    reviewer.store().history().read_records().unwrap().len()
}

fn dry_run_start(baseline: &str) -> StartOptions {
    StartOptions {
        baseline: baseline.to_string(),
        dry_run: true,
        ..StartOptions::default()
    }
}

#[tokio::test]
async fn dry_run_emits_one_canned_finding_per_hunk() {
    let dir = tempfile::tempdir().unwrap();
    let c0 = init_repo(dir.path());
    commit(
        dir.path(),
        &[("a.txt", "a\n"), ("b.txt", "b\n"), ("c.txt", "c\n")],
        "three files",
    );

    let sink = Arc::new(CollectingSink::new());
    let reviewer = reviewer(dir.path(), Config::default(), FakeClient::scripted(&[]))
        .with_sink(sink.clone());
    let cancel = CancellationToken::new();
    let summary = reviewer.start(dry_run_start(&c0), &cancel).await.unwrap();

    assert_eq!(summary.hunks_reviewed, 3);
    assert_eq!(summary.findings.len(), 3);
    for finding in &summary.findings {
        assert_eq!(finding.severity, Severity::Info);
        assert_eq!(finding.category, Category::Maintainability);
        assert!((finding.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(finding.line, Some(1));
        assert_eq!(finding.message, DRY_RUN_MESSAGE);
    }
    let files: Vec<&str> = summary.findings.iter().map(|f| f.file.as_str()).collect();
    assert_eq!(files, vec!["a.txt", "b.txt", "c.txt"]);
    let ids: Vec<String> = summary.findings.iter().map(|f| f.id.clone()).collect();
    let distinct: std::collections::HashSet<&String> = ids.iter().collect();
    assert_eq!(distinct.len(), 3);

    let events = sink.events();
    let finding_events = events
        .iter()
        .filter(|e| matches!(e, Event::Finding { .. }))
        .count();
    assert_eq!(finding_events, 3);
    assert_eq!(events.last(), Some(&Event::Done));

    let rerun = reviewer
        .run(
            RunOptions {
                dry_run: true,
                force_full_review: true,
                replace: true,
            },
            &cancel,
        )
        .await
        .unwrap();
    let rerun_ids: Vec<String> = rerun.findings.iter().map(|f| f.id.clone()).collect();
    assert_eq!(rerun_ids, ids);
}

#[tokio::test]
async fn critic_rejection_keeps_only_confirmed_findings() {
    let dir = tempfile::tempdir().unwrap();
    let c0 = init_repo(dir.path());
    commit(
        dir.path(),
        &[(
            "main.go",
            "package main\n\nfunc main() {\n\tfor i := 0; i <= 10; i++ {\n\t}\n}\n",
        )],
        "add main",
    );

    let review = r#"[
        {"file":"main.go","line":4,"severity":"error","category":"bug","confidence":0.95,"message":"Loop bound is off by one"},
        {"file":"main.go","line":5,"severity":"warning","category":"bug","confidence":0.9,"message":"Loop body discards the index"}
    ]"#;
    let client = FakeClient::scripted(&[review, r#"{"verdict":"no"}"#, r#"{"verdict":"yes"}"#]);
    let config = Config {
        critic_enabled: true,
        ..Config::default()
    };
    let reviewer = reviewer(dir.path(), config, Arc::clone(&client));
    let summary = reviewer
        .start(
            StartOptions {
                baseline: c0,
                ..StartOptions::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let messages: Vec<&str> = summary.findings.iter().map(|f| f.message.as_str()).collect();
    assert_eq!(messages, vec!["Loop body discards the index"]);
    assert!(summary.findings[0]
        .cursor_uri
        .as_deref()
        .is_some_and(|uri| uri.starts_with("file://") && uri.ends_with("main.go#L5")));

    let requests = client.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[0].keep_alive, KeepAlive::Indefinite);
    assert!(requests[0].system.as_deref().is_some_and(|s| s.contains("## User Intent")));
    assert_eq!(requests[1].keep_alive, KeepAlive::Indefinite);
    let last = requests.last().unwrap();
    assert!(last.is_unload());
    assert_eq!(last.keep_alive, KeepAlive::UnloadNow);
    assert_eq!(summary.usage.prompt_tokens, 10);
}

#[tokio::test]
async fn cancellation_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let c0 = init_repo(dir.path());
    commit(dir.path(), &[("a.txt", "a\n")], "a");

    let cancel = CancellationToken::new();
    let setup = reviewer(dir.path(), Config::default(), FakeClient::scripted(&[]));
    setup.start(dry_run_start(&c0), &cancel).await.unwrap();

    commit(dir.path(), &[("b.txt", "b\n"), ("c.txt", "c\n")], "more");
    let session_path = setup.store().state_dir().join(SESSION_FILE);
    let before = std::fs::metadata(&session_path).unwrap().modified().unwrap();
    let history_before = history_len(&setup);
    drop(setup);

    let token = CancellationToken::new();
    let reviewer = reviewer(dir.path(), Config::default(), FakeClient::scripted(&[]))
        .with_sink(Arc::new(CancelOnFinding {
            token: token.clone(),
        }));
    let result = reviewer
        .run(
            RunOptions {
                dry_run: true,
                ..RunOptions::default()
            },
            &token,
        )
        .await;

    assert!(matches!(result, Err(StetError::Cancelled)), "{result:?}");
    let after = std::fs::metadata(&session_path).unwrap().modified().unwrap();
    assert_eq!(before, after);
    assert_eq!(history_len(&reviewer), history_before);
    assert!(reviewer.store().acquire_lock().is_ok());
}

#[tokio::test]
async fn fixed_findings_are_auto_dismissed_as_already_correct() {
    let dir = tempfile::tempdir().unwrap();
    let c0 = init_repo(dir.path());
    commit(
        dir.path(),
        &[("calc.py", "def div(a, b):\n    return a / b\n")],
        "add div",
    );

    let finding = r#"[{"file":"calc.py","line":2,"severity":"error","category":"bug","confidence":0.9,"message":"Division by zero when b is 0"}]"#;
    let client = FakeClient::scripted(&[finding, "[]"]);
    let reviewer = reviewer(dir.path(), Config::default(), client);
    let cancel = CancellationToken::new();
    let started = reviewer
        .start(
            StartOptions {
                baseline: c0,
                ..StartOptions::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(started.findings.len(), 1);
    let id = started.findings[0].id.clone();

    commit(
        dir.path(),
        &[(
            "calc.py",
            "def div(a, b):\n    if b == 0:\n        return 0\n    return a / b\n",
        )],
        "guard zero",
    );
    let summary = reviewer.run(RunOptions::default(), &cancel).await.unwrap();
    assert_eq!(summary.auto_dismissed, vec![id.clone()]);
    assert!(reviewer.list().unwrap().is_empty());

    let session = reviewer.store().sessions().load().unwrap();
    assert_eq!(session.dismissed_ids, vec![id.clone()]);
    assert_eq!(session.last_reviewed_at, git(dir.path(), &["rev-parse", "HEAD"]));

    let records = reviewer.store().history().read_records().unwrap();
    let dismissals: Vec<_> = records
        .iter()
        .flat_map(|r| &r.user_action.dismissals)
        .collect();
    assert_eq!(dismissals.len(), 1);
    assert_eq!(dismissals[0].finding_id, id);
    assert_eq!(dismissals[0].reason, DismissReason::AlreadyCorrect);

    let history_before = records.len();
    let again = reviewer.run(RunOptions::default(), &cancel).await.unwrap();
    assert_eq!(again.hunks_reviewed, 0);
    assert_eq!(history_len(&reviewer), history_before);
}

#[tokio::test]
async fn replace_run_overwrites_findings_and_clears_dismissals() {
    let dir = tempfile::tempdir().unwrap();
    let c0 = init_repo(dir.path());
    commit(
        dir.path(),
        &[("a.go", "package a\nvar A = 1 / 0\n"), ("b.go", "package b\nvar B = 2 / 0\n")],
        "two files",
    );

    let client = FakeClient::scripted(&[
        r#"[{"file":"a.go","line":2,"severity":"error","category":"bug","confidence":0.9,"message":"Constant division by zero in A"}]"#,
        r#"[{"file":"b.go","line":2,"severity":"error","category":"bug","confidence":0.9,"message":"Constant division by zero in B"}]"#,
        r#"[{"file":"c.go","line":2,"severity":"error","category":"bug","confidence":0.9,"message":"Constant division by zero in C"}]"#,
    ]);
    let reviewer = reviewer(dir.path(), Config::default(), client);
    let cancel = CancellationToken::new();
    let started = reviewer
        .start(
            StartOptions {
                baseline: c0,
                ..StartOptions::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(started.findings.len(), 2);
    let dismissed = started.findings[0].id.clone();
    reviewer
        .dismiss(&[dismissed.clone()], DismissReason::WontFix)
        .unwrap();
    let session = reviewer.store().sessions().load().unwrap();
    assert_eq!(session.dismissed_ids, vec![dismissed]);
    assert_eq!(session.finding_prompt_context.len(), 2);

    commit(dir.path(), &[("c.go", "package c\nvar C = 3 / 0\n")], "third file");
    let summary = reviewer
        .run(
            RunOptions {
                replace: true,
                ..RunOptions::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(summary.hunks_reviewed, 1);
    assert!(summary.auto_dismissed.is_empty());

    let session = reviewer.store().sessions().load().unwrap();
    let messages: Vec<&str> = session.findings.iter().map(|f| f.message.as_str()).collect();
    assert_eq!(messages, vec!["Constant division by zero in C"]);
    assert!(session.dismissed_ids.is_empty());
    let context_ids: Vec<&String> = session.finding_prompt_context.keys().collect();
    assert_eq!(context_ids, vec![&session.findings[0].id]);

    let records = reviewer.store().history().read_records().unwrap();
    let last = records.last().unwrap();
    assert_eq!(last.user_action.replace_findings, Some(true));
    assert!(records[..records.len() - 1]
        .iter()
        .all(|record| record.user_action.replace_findings.is_none()));
}

#[tokio::test]
async fn dismiss_then_finish_writes_note_and_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let c0 = init_repo(dir.path());
    let head = commit(dir.path(), &[("a.txt", "a\n"), ("b.txt", "b\n")], "two");

    let reviewer = reviewer(dir.path(), Config::default(), FakeClient::scripted(&[]));
    let cancel = CancellationToken::new();
    let summary = reviewer.start(dry_run_start(&c0), &cancel).await.unwrap();
    let target = summary.findings[0].id.clone();

    let status = reviewer.status().unwrap().unwrap();
    let worktree = status.worktree_path.clone().unwrap();
    assert!(worktree.is_dir());
    assert_eq!(status.active_findings, 2);

    let resolved = reviewer
        .dismiss(&[target[..10].to_string()], DismissReason::FalsePositive)
        .unwrap();
    assert_eq!(resolved, vec![target.clone()]);
    let active: Vec<String> = reviewer.list().unwrap().into_iter().map(|f| f.id).collect();
    assert!(!active.contains(&target));
    let session = reviewer.store().sessions().load().unwrap();
    assert_eq!(session.prompt_shadows.len(), 1);
    assert_eq!(session.prompt_shadows[0].finding_id, target);

    let note = reviewer.finish().await.unwrap();
    assert_eq!(note.head_sha, head);
    assert_eq!(note.findings_count, 2);
    assert_eq!(note.dismissals_count, 1);
    assert_eq!(note.hunks_reviewed, 2);
    assert_eq!(note.lines_added, 2);

    let cli = GitCli::open(dir.path()).unwrap();
    let stored: NoteBody =
        serde_json::from_str(&cli.note_show(NOTES_REF, &head).await.unwrap().unwrap()).unwrap();
    assert_eq!(stored.session_id, summary.session_id);
    assert!(!worktree.exists());
    assert!(!reviewer.store().sessions().exists());
    assert!(reviewer.status().unwrap().is_none());

    let stats = reviewer.stats().unwrap();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.sessions_finished, 1);
    assert_eq!(stats.dismissals_by_reason.get("false_positive"), Some(&1));
}

#[tokio::test]
async fn start_rejects_foreign_baseline_without_worktree() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    git(dir.path(), &["checkout", "-q", "-b", "side"]);
    let side = commit(dir.path(), &[("side.txt", "s\n")], "side");
    git(dir.path(), &["checkout", "-q", "main"]);
    commit(dir.path(), &[("main.txt", "m\n")], "main");

    let reviewer = reviewer(dir.path(), Config::default(), FakeClient::scripted(&[]));
    let err = reviewer
        .start(dry_run_start(&side), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StetError::BaselineNotAncestor { .. }), "{err:?}");
    assert!(!dir.path().join(".review").join("worktrees").exists());
    assert!(!reviewer.store().sessions().exists());
}

#[tokio::test]
async fn concurrent_runs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let c0 = init_repo(dir.path());
    commit(dir.path(), &[("a.txt", "a\n")], "a");

    let reviewer = reviewer(dir.path(), Config::default(), FakeClient::scripted(&[]));
    let other = FileStore::new(reviewer.store().state_dir());
    let _held = other.acquire_lock().unwrap();

    let err = reviewer
        .start(dry_run_start(&c0), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StetError::SessionLocked), "{err:?}");
}

#[tokio::test]
async fn start_at_head_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    let head = init_repo(dir.path());

    let sink = Arc::new(CollectingSink::new());
    let reviewer = reviewer(dir.path(), Config::default(), FakeClient::scripted(&[]))
        .with_sink(sink.clone());
    let summary = reviewer
        .start(
            StartOptions {
                baseline: "HEAD".to_string(),
                ..StartOptions::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(summary.findings.is_empty());
    assert_eq!(sink.events(), vec![Event::Done]);
    let session = reviewer.store().sessions().load().unwrap();
    assert_eq!(session.last_reviewed_at, head);
    assert_eq!(session.baseline_ref, head);
    assert!(session.worktree_path.is_none());
}
