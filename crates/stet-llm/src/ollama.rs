use crate::client::{GenerateRequest, GenerateResponse, LlmError, ModelClient};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    model: String,
}

/// Outcome of one HTTP attempt, before retry policy is applied.
enum Attempt<T> {
    Done(T),
    Retryable(String),
}

/// Client for an Ollama-compatible server.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| LlmError::Unreachable {
                reason: format!("build http client: {err}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn with_retries<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Attempt<T>, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::Cancelled),
                outcome = attempt_fn() => outcome?,
            };
            let reason = match outcome {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retryable(reason) => reason,
            };
            if attempt >= self.retry.max_retries {
                return Err(LlmError::Unreachable { reason });
            }
            let delay = self.retry.delay(attempt);
            tracing::warn!(attempt = attempt + 1, ?delay, %reason, "retrying model request");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn fetch_tags(&self) -> Result<Attempt<TagsResponse>, LlmError> {
        let response = match self
            .http
            .get(self.url("/api/tags"))
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Ok(Attempt::Retryable(err.to_string())),
        };
        let status = response.status();
        if status.is_server_error() {
            return Ok(Attempt::Retryable(format!("server error {status}")));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadRequest {
                status: status.as_u16(),
                body,
            });
        }
        let tags = response
            .json::<TagsResponse>()
            .await
            .map_err(|err| LlmError::Decode {
                reason: err.to_string(),
            })?;
        Ok(Attempt::Done(tags))
    }

    async fn post_generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<Attempt<GenerateResponse>, LlmError> {
        let response = match self
            .http
            .post(self.url("/api/generate"))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return Ok(Attempt::Retryable(err.to_string())),
        };
        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Ok(Attempt::Retryable(format!("server error {status}: {body}")));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BadRequest {
                status: status.as_u16(),
                body,
            });
        }
        let body = response
            .json::<GenerateResponse>()
            .await
            .map_err(|err| LlmError::Decode {
                reason: err.to_string(),
            })?;
        Ok(Attempt::Done(body))
    }
}

/// `llama3` on the server is listed as `llama3:latest`.
fn model_matches(listed: &str, wanted: &str) -> bool {
    listed == wanted
        || (!wanted.contains(':') && listed.strip_suffix(":latest") == Some(wanted))
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn check(&self, model: &str, cancel: &CancellationToken) -> Result<(), LlmError> {
        let tags = self.with_retries(cancel, || self.fetch_tags()).await?;
        let found = tags
            .models
            .iter()
            .any(|entry| model_matches(&entry.name, model) || model_matches(&entry.model, model));
        if found {
            Ok(())
        } else {
            Err(LlmError::ModelNotFound {
                model: model.to_string(),
            })
        }
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, LlmError> {
        tracing::debug!(model = %request.model, prompt_bytes = request.prompt.len(), "generate");
        self.with_retries(cancel, || self.post_generate(request))
            .await
    }
}
