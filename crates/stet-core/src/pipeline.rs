//! The review pipeline: a preparer pool feeding a single inference worker,
//! with results processed in hunk order on the calling task.
//!
//! ```text
//! preparers (N) --ready(2*buf)--> slots[index] --mailbox(1)--> inference
//!                                                                  |
//!            processor (parse, filter, critic, emit) <--results----+
//! ```
//!
//! The processor is a single loop over `(processed, next_send, ready_open)`.
//! Item `k` is dispatched as soon as it is prepared and the worker is idle,
//! so processing of `k - 1` overlaps with the model working on `k`.

use crate::critic::{self, CriticConfig, Verdict};
use crate::diff::hunk_new_start;
use crate::error::StetError;
use crate::findings::{self, FilterThresholds};
use crate::hunk_id::{semantic_id, strict_id};
use crate::prepare::{PreparedPrompt, PromptPreparer};
use crate::prompt::context_budget_warning;
use crate::types::{Finding, Hunk, Usage};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stet_events::{Event, EventSink};
use stet_llm::{
    GenerateOptions, GenerateRequest, GenerateResponse, KeepAlive, LlmError, ModelClient,
};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_PREPARE_BUFFER_SIZE: usize = 5;
pub const DRY_RUN_MESSAGE: &str = "Dry run: this hunk was not sent to the model.";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model: String,
    pub options: GenerateOptions,
    pub concurrency: usize,
    pub prepare_buffer_size: usize,
    pub thresholds: FilterThresholds,
    pub critic: CriticConfig,
    pub dry_run: bool,
    pub context_limit: u32,
    pub warn_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            options: GenerateOptions::default(),
            concurrency: DEFAULT_CONCURRENCY,
            prepare_buffer_size: DEFAULT_PREPARE_BUFFER_SIZE,
            thresholds: FilterThresholds::default(),
            critic: CriticConfig::default(),
            dry_run: false,
            context_limit: 32768,
            warn_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    pub findings: Vec<Finding>,
    /// `finding_id -> hunk raw content` (capped) for later shadowing.
    pub prompt_context: BTreeMap<String, String>,
    pub usage: Usage,
}

struct Prepared {
    index: usize,
    result: Result<PreparedPrompt, StetError>,
}

struct InferenceJob {
    index: usize,
    attempt: u8,
    prompt: PreparedPrompt,
    request: GenerateRequest,
}

struct Generated {
    index: usize,
    attempt: u8,
    prompt: PreparedPrompt,
    result: Result<GenerateResponse, StetError>,
}

enum Step {
    Done(Vec<Finding>),
    Retry(PreparedPrompt),
}

/// Wraps the model client for one run and remembers which models the run has
/// left loaded.
struct Residency {
    inner: Arc<dyn ModelClient>,
    resident: Mutex<BTreeSet<String>>,
}

impl Residency {
    fn new(inner: Arc<dyn ModelClient>) -> Self {
        Self {
            inner,
            resident: Mutex::default(),
        }
    }

    fn note(&self, request: &GenerateRequest) {
        let Ok(mut resident) = self.resident.lock() else {
            return;
        };
        if request.keep_alive == KeepAlive::UnloadNow {
            resident.remove(&request.model);
        } else {
            resident.insert(request.model.clone());
        }
    }

    /// Evicts every model still resident. Failures only cost memory on the
    /// server, so they are logged and dropped.
    async fn release(&self, cancel: &CancellationToken) {
        let models: Vec<String> = match self.resident.lock() {
            Ok(resident) => resident.iter().cloned().collect(),
            Err(_) => return,
        };
        for model in models {
            let request = GenerateRequest::unload(model);
            self.note(&request);
            if let Err(err) = self.inner.generate(&request, cancel).await {
                tracing::debug!(model = %request.model, error = %err, "model unload failed");
            }
        }
    }
}

#[async_trait]
impl ModelClient for Residency {
    async fn check(&self, model: &str, cancel: &CancellationToken) -> Result<(), LlmError> {
        self.inner.check(model, cancel).await
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, LlmError> {
        self.note(request);
        self.inner.generate(request, cancel).await
    }
}

pub struct ReviewPipeline {
    preparer: Arc<PromptPreparer>,
    client: Arc<dyn ModelClient>,
    settings: PipelineSettings,
    repo_root: PathBuf,
}

impl ReviewPipeline {
    pub fn new(
        preparer: Arc<PromptPreparer>,
        client: Arc<dyn ModelClient>,
        settings: PipelineSettings,
    ) -> Self {
        let repo_root = preparer.repo_root.clone();
        Self {
            preparer,
            client,
            settings,
            repo_root,
        }
    }

    /// Reviews `hunks` in order. Stops at the first failure; nothing partial
    /// is returned.
    pub async fn run(
        &self,
        hunks: Vec<Hunk>,
        sink: Option<&dyn EventSink>,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, StetError> {
        if hunks.is_empty() {
            return Ok(PipelineOutput::default());
        }
        self.check_budget(&hunks, sink);

        let hunks = Arc::new(hunks);
        let stop = cancel.child_token();
        let capacity = (2 * self.settings.prepare_buffer_size).max(1);
        let (ready_tx, ready_rx) = mpsc::channel(capacity);
        let (job_tx, job_rx) = mpsc::channel(1);
        let (result_tx, result_rx) = mpsc::channel(2);

        let client = Arc::new(Residency::new(Arc::clone(&self.client)));
        let mut preparers = self.spawn_preparers(Arc::clone(&hunks), ready_tx, stop.clone());
        let worker = self.spawn_inference(Arc::clone(&client), job_rx, result_tx, stop.clone());

        let outcome = self
            .process(client.as_ref(), &hunks, ready_rx, &job_tx, result_rx, sink, &stop)
            .await;

        stop.cancel();
        drop(job_tx);
        preparers.abort_all();
        worker.abort();
        // Late retries and critic calls can follow the last hunk's request.
        match &outcome {
            Err(err) if cancel.is_cancelled() || err.is_cancelled() => {}
            Err(StetError::Review { source, .. })
                if matches!(**source, StetError::Unreachable { .. }) => {}
            _ => client.release(cancel).await,
        }

        match outcome {
            Err(err) if cancel.is_cancelled() || err.is_cancelled() => Err(StetError::Cancelled),
            other => other,
        }
    }

    fn check_budget(&self, hunks: &[Hunk], sink: Option<&dyn EventSink>) {
        let max_estimate = hunks
            .iter()
            .map(|hunk| self.preparer.estimate_tokens(hunk))
            .max()
            .unwrap_or(0);
        if let Some(message) = context_budget_warning(
            max_estimate,
            self.settings.context_limit,
            self.settings.warn_threshold,
        ) {
            tracing::warn!(max_estimate, "{message}");
            if let Some(sink) = sink {
                sink.emit(Event::warning(message));
            }
        }
    }

    fn spawn_preparers(
        &self,
        hunks: Arc<Vec<Hunk>>,
        ready: mpsc::Sender<Prepared>,
        stop: CancellationToken,
    ) -> JoinSet<()> {
        let next = Arc::new(AtomicUsize::new(0));
        let mut set = JoinSet::new();
        for _ in 0..self.settings.concurrency.max(1) {
            let hunks = Arc::clone(&hunks);
            let ready = ready.clone();
            let next = Arc::clone(&next);
            let stop = stop.clone();
            let preparer = Arc::clone(&self.preparer);
            set.spawn(async move {
                loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(hunk) = hunks.get(index).cloned() else {
                        break;
                    };
                    let worker = Arc::clone(&preparer);
                    let expanded = tokio::task::spawn_blocking(move || worker.expand(&hunk))
                        .await
                        .map_err(|err| StetError::Internal {
                            message: format!("preparer task failed: {err}"),
                        });
                    let result = match expanded {
                        Ok(expanded) => Ok(preparer.assemble(expanded).await),
                        Err(err) => Err(err),
                    };
                    let prepared = Prepared { index, result };
                    tokio::select! {
                        biased;
                        () = stop.cancelled() => break,
                        sent = ready.send(prepared) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
        set
    }

    fn spawn_inference(
        &self,
        client: Arc<Residency>,
        mut jobs: mpsc::Receiver<InferenceJob>,
        results: mpsc::Sender<Generated>,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let dry_run = self.settings.dry_run;
        tokio::spawn(async move {
            while let Some(job) = jobs.recv().await {
                let result = if dry_run {
                    Ok(dry_run_response(&job.prompt.hunk))
                } else {
                    client
                        .generate(&job.request, &stop)
                        .await
                        .map_err(StetError::from)
                };
                let generated = Generated {
                    index: job.index,
                    attempt: job.attempt,
                    prompt: job.prompt,
                    result,
                };
                if results.send(generated).await.is_err() {
                    break;
                }
            }
        })
    }

    fn request_for(&self, index: usize, total: usize, prompt: &PreparedPrompt) -> GenerateRequest {
        let mut request = GenerateRequest::json(
            self.settings.model.clone(),
            Some(prompt.system.clone()),
            prompt.user.clone(),
        );
        request.options = self.settings.options.clone();
        let critic_follows = self.settings.critic.enabled && !self.settings.dry_run;
        request.keep_alive = if index + 1 == total && !critic_follows {
            KeepAlive::UnloadNow
        } else {
            KeepAlive::Indefinite
        };
        request
    }

    async fn dispatch(
        &self,
        jobs: &mpsc::Sender<InferenceJob>,
        index: usize,
        attempt: u8,
        total: usize,
        prompt: PreparedPrompt,
        stop: &CancellationToken,
    ) -> Result<(), StetError> {
        let request = self.request_for(index, total, &prompt);
        let job = InferenceJob {
            index,
            attempt,
            prompt,
            request,
        };
        tokio::select! {
            biased;
            () = stop.cancelled() => Err(StetError::Cancelled),
            sent = jobs.send(job) => sent.map_err(|_| StetError::Internal {
                message: "inference worker stopped".to_string(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        client: &dyn ModelClient,
        hunks: &[Hunk],
        mut ready: mpsc::Receiver<Prepared>,
        jobs: &mpsc::Sender<InferenceJob>,
        mut results: mpsc::Receiver<Generated>,
        sink: Option<&dyn EventSink>,
        stop: &CancellationToken,
    ) -> Result<PipelineOutput, StetError> {
        let total = hunks.len();
        let mut prepared: Vec<Option<Result<PreparedPrompt, StetError>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        let mut generated: Vec<Option<Generated>> =
            std::iter::repeat_with(|| None).take(total).collect();
        let mut processed = 0;
        let mut next_send = 0;
        let mut outstanding = 0usize;
        let mut ready_open = true;
        let mut output = PipelineOutput::default();

        while processed < total {
            if stop.is_cancelled() {
                return Err(StetError::Cancelled);
            }
            if outstanding == 0 && next_send < total {
                if let Some(slot) = prepared[next_send].take() {
                    let path = &hunks[next_send].file_path;
                    let prompt = slot.map_err(|err| StetError::review(path, err))?;
                    if let Some(sink) = sink {
                        sink.emit(Event::progress(format!(
                            "Reviewing hunk {}/{total}: {path}",
                            next_send + 1
                        )));
                    }
                    self.dispatch(jobs, next_send, 0, total, prompt, stop).await?;
                    outstanding += 1;
                    next_send += 1;
                    continue;
                }
            }

            if let Some(done) = generated[processed].take() {
                let index = done.index;
                match self.handle(client, done, &mut output.usage, stop).await? {
                    Step::Retry(prompt) => {
                        self.dispatch(jobs, index, 1, total, prompt, stop).await?;
                        outstanding += 1;
                    }
                    Step::Done(kept) => {
                        for finding in kept {
                            if let Some(sink) = sink {
                                match serde_json::to_value(&finding) {
                                    Ok(data) => sink.emit(Event::Finding { data }),
                                    Err(err) => {
                                        tracing::warn!(error = %err, "could not encode finding event");
                                    }
                                }
                            }
                            output.prompt_context.insert(
                                finding.id.clone(),
                                findings::prompt_context(&hunks[index]),
                            );
                            output.findings.push(finding);
                        }
                        processed += 1;
                    }
                }
                continue;
            }

            if outstanding == 0 && !ready_open {
                return Err(StetError::Internal {
                    message: format!("no prepared input for hunk {}", next_send + 1),
                });
            }

            tokio::select! {
                biased;
                () = stop.cancelled() => return Err(StetError::Cancelled),
                received = results.recv(), if outstanding > 0 => {
                    let Some(done) = received else {
                        return Err(StetError::Internal {
                            message: "inference worker stopped".to_string(),
                        });
                    };
                    outstanding -= 1;
                    let index = done.index;
                    generated[index] = Some(done);
                }
                received = ready.recv(), if ready_open => match received {
                    Some(item) => prepared[item.index] = Some(item.result),
                    None => ready_open = false,
                },
            }
        }
        Ok(output)
    }

    /// Parse, filter and verify one model response.
    async fn handle(
        &self,
        client: &dyn ModelClient,
        done: Generated,
        usage: &mut Usage,
        stop: &CancellationToken,
    ) -> Result<Step, StetError> {
        let hunk = &done.prompt.hunk;
        let path = hunk.file_path.clone();
        let response = done.result.map_err(|err| StetError::review(&path, err))?;
        usage.add(
            response.prompt_eval_count,
            response.eval_count,
            response.eval_duration,
        );
        if usage.model.is_empty() {
            usage.model = if response.model.is_empty() {
                self.settings.model.clone()
            } else {
                response.model.clone()
            };
        }

        let mut parsed = match findings::parse_findings(&response.response) {
            Ok(parsed) => parsed,
            Err(err) if done.attempt == 0 => {
                tracing::debug!(index = done.index, file = %path, error = %err, "unparseable response; retrying");
                return Ok(Step::Retry(done.prompt));
            }
            Err(err) => return Err(StetError::review(&path, err.into())),
        };
        findings::assign_ids(&mut parsed, hunk).map_err(|err| StetError::review(&path, err.into()))?;
        let parsed_count = parsed.len();

        let thresholds = &self.settings.thresholds;
        let kept = findings::apply_abstention(parsed, thresholds);
        let after_abstention = kept.len();
        let kept = findings::apply_fp_kill(kept, thresholds, hunk);
        let after_fp_kill = kept.len();
        let kept = findings::apply_evidence(kept, hunk);
        let after_evidence = kept.len();

        let mut verified = Vec::with_capacity(kept.len());
        if self.settings.critic.enabled && !self.settings.dry_run {
            for finding in kept {
                let verdict = critic::verify(
                    client,
                    &self.settings.critic,
                    &self.settings.model,
                    &finding,
                    hunk,
                    stop,
                )
                .await
                .map_err(|err| StetError::review(&path, err))?;
                if verdict == Verdict::Keep {
                    verified.push(finding);
                }
            }
        } else {
            verified = kept;
        }

        tracing::debug!(
            index = done.index,
            file = %path,
            strict_id = %strict_id(&path, &hunk.raw_content),
            semantic_id = %semantic_id(&path, &hunk.raw_content),
            parsed = parsed_count,
            after_abstention,
            after_fp_kill,
            after_evidence,
            after_critic = verified.len(),
            "hunk processed"
        );

        for finding in &mut verified {
            finding.cursor_uri =
                findings::cursor_uri(&self.repo_root, &finding.file, finding.effective_line());
        }
        Ok(Step::Done(verified))
    }
}

/// Canned single-finding response used when inference is skipped.
fn dry_run_response(hunk: &Hunk) -> GenerateResponse {
    let line = hunk_new_start(&hunk.raw_content).unwrap_or(1);
    let body = json!([{
        "file": hunk.file_path,
        "line": line,
        "severity": "info",
        "category": "maintainability",
        "confidence": 1.0,
        "message": DRY_RUN_MESSAGE,
    }]);
    GenerateResponse::text(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::AstRegistry;
    use crate::prepare::PrepareLimits;
    use crate::symbols::SymbolRegistry;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};
    use std::path::Path;
    use std::sync::Mutex;
    use stet_events::CollectingSink;
    use stet_llm::LlmError;
    use stet_vcs::GitCli;

    /// Answers by the first script key found in the prompt, so interleaved
    /// retries stay deterministic.
    #[derive(Default)]
    struct ByFileClient {
        scripts: Mutex<HashMap<String, VecDeque<String>>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ByFileClient {
        fn new(scripts: &[(&str, &[&str])]) -> Arc<Self> {
            let scripts = scripts
                .iter()
                .map(|(file, replies)| {
                    let replies = replies.iter().map(|reply| reply.to_string()).collect();
                    (file.to_string(), replies)
                })
                .collect();
            Arc::new(Self {
                scripts: Mutex::new(scripts),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<GenerateRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for ByFileClient {
        async fn check(&self, _model: &str, _cancel: &CancellationToken) -> Result<(), LlmError> {
            Ok(())
        }

        async fn generate(
            &self,
            request: &GenerateRequest,
            _cancel: &CancellationToken,
        ) -> Result<GenerateResponse, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut scripts = self.scripts.lock().unwrap();
            let reply = scripts
                .iter_mut()
                .find(|(key, _)| request.prompt.contains(key.as_str()))
                .and_then(|(_, replies)| replies.pop_front())
                .unwrap_or_else(|| "[]".to_string());
            let mut response = GenerateResponse::text(reply);
            response.prompt_eval_count = 7;
            response.eval_count = 3;
            Ok(response)
        }
    }

    fn preparer(root: &Path) -> Arc<PromptPreparer> {
        std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(root)
            .status()
            .unwrap();
        Arc::new(PromptPreparer {
            repo_root: root.to_path_buf(),
            vcs: Arc::new(GitCli::open(root).unwrap()),
            ast: AstRegistry::empty(),
            symbols: SymbolRegistry::empty(),
            system_base: "You review code.".to_string(),
            rules_by_file: HashMap::new(),
            suppression: Vec::new(),
            limits: PrepareLimits::default(),
        })
    }

    fn added(file: &str) -> Hunk {
        Hunk::new(file, "@@ -0,0 +1,2 @@\n+let x = 1;\n+let y = x / 0;")
    }

    fn finding_for(file: &str) -> String {
        format!(
            r#"[{{"file":"{file}","line":2,"severity":"error","category":"bug","confidence":0.9,"message":"Division by zero"}}]"#
        )
    }

    #[tokio::test]
    async fn findings_come_out_in_hunk_order_after_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let alpha = finding_for("alpha.rs");
        let gamma = finding_for("gamma.rs");
        let client = ByFileClient::new(&[
            ("File: alpha.rs", &["this is not json", alpha.as_str()]),
            ("File: beta.rs", &["[]"]),
            ("File: gamma.rs", &[gamma.as_str()]),
        ]);
        let pipeline = ReviewPipeline::new(
            preparer(dir.path()),
            client.clone(),
            PipelineSettings {
                model: "m".to_string(),
                ..PipelineSettings::default()
            },
        );

        let output = pipeline
            .run(
                vec![added("alpha.rs"), added("beta.rs"), added("gamma.rs")],
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let files: Vec<&str> = output.findings.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(files, vec!["alpha.rs", "gamma.rs"]);
        assert_eq!(output.prompt_context.len(), 2);
        let requests = client.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(output.usage.prompt_tokens, 28);
        let last_hunk = requests
            .iter()
            .find(|request| request.prompt.contains("File: gamma.rs"))
            .unwrap();
        assert_eq!(last_hunk.keep_alive, KeepAlive::UnloadNow);
        assert!(
            requests
                .iter()
                .filter(|request| request.prompt.contains("File: alpha.rs"))
                .all(|request| request.keep_alive == KeepAlive::Indefinite)
        );
    }

    /// Models whose most recent request asked the server to keep them loaded.
    fn left_resident(requests: &[GenerateRequest]) -> BTreeSet<String> {
        let mut resident = BTreeSet::new();
        for request in requests {
            if request.keep_alive == KeepAlive::UnloadNow {
                resident.remove(&request.model);
            } else {
                resident.insert(request.model.clone());
            }
        }
        resident
    }

    #[tokio::test]
    async fn late_retry_still_ends_with_the_model_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let alpha = finding_for("alpha.rs");
        let client = ByFileClient::new(&[
            ("File: alpha.rs", &["this is not json", alpha.as_str()]),
            ("File: beta.rs", &["[]"]),
        ]);
        let pipeline = ReviewPipeline::new(
            preparer(dir.path()),
            client.clone(),
            PipelineSettings {
                model: "m".to_string(),
                ..PipelineSettings::default()
            },
        );

        let output = pipeline
            .run(
                vec![added("alpha.rs"), added("beta.rs")],
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.findings.len(), 1);
        let requests = client.requests();
        assert_eq!(
            requests.last().map(|request| &request.keep_alive),
            Some(&KeepAlive::UnloadNow)
        );
        assert!(left_resident(&requests).is_empty());
        assert_eq!(output.usage.prompt_tokens, 21);
    }

    #[tokio::test]
    async fn critic_calls_end_with_the_model_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        let alpha = finding_for("alpha.rs");
        let client = ByFileClient::new(&[
            ("File: alpha.rs", &[alpha.as_str()]),
            ("## Finding", &[r#"{"verdict":"yes"}"#]),
        ]);
        let pipeline = ReviewPipeline::new(
            preparer(dir.path()),
            client.clone(),
            PipelineSettings {
                model: "m".to_string(),
                critic: CriticConfig {
                    enabled: true,
                    ..CriticConfig::default()
                },
                ..PipelineSettings::default()
            },
        );

        let output = pipeline
            .run(vec![added("alpha.rs")], None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.findings.len(), 1);
        let requests = client.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].keep_alive, KeepAlive::Indefinite);
        assert!(requests[2].is_unload());
        assert_eq!(requests[2].model, "m");
        assert!(left_resident(&requests).is_empty());
    }

    #[tokio::test]
    async fn second_unparseable_response_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let client = ByFileClient::new(&[("File: alpha.rs", &["nope", "still nope"])]);
        let pipeline =
            ReviewPipeline::new(preparer(dir.path()), client, PipelineSettings::default());

        let err = pipeline
            .run(vec![added("alpha.rs")], None, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            StetError::Review { path, source } => {
                assert_eq!(path, "alpha.rs");
                assert!(matches!(*source, StetError::Parse(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dry_run_warns_when_prompts_crowd_the_context() {
        let dir = tempfile::tempdir().unwrap();
        let client = ByFileClient::new(&[]);
        let sink = CollectingSink::new();
        let pipeline = ReviewPipeline::new(
            preparer(dir.path()),
            client.clone(),
            PipelineSettings {
                dry_run: true,
                context_limit: 100,
                ..PipelineSettings::default()
            },
        );

        let output = pipeline
            .run(
                vec![added("alpha.rs"), added("beta.rs")],
                Some(&sink),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(client.requests().is_empty());
        assert_eq!(output.findings.len(), 2);
        assert!(output.findings.iter().all(|f| f.message == DRY_RUN_MESSAGE));
        let events = sink.events();
        assert!(matches!(events.first(), Some(Event::Warning { .. })));
        let progress = events
            .iter()
            .filter(|event| matches!(event, Event::Progress { .. }))
            .count();
        assert_eq!(progress, 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let client = ByFileClient::new(&[]);
        let pipeline =
            ReviewPipeline::new(preparer(dir.path()), client, PipelineSettings::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline
            .run(vec![added("alpha.rs")], None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StetError::Cancelled));
    }
}
