use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model server unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("bad request ({status}): {body}")]
    BadRequest { status: u16, body: String },
    #[error("model not found: {model}")]
    ModelNotFound { model: String },
    #[error("invalid response: {reason}")]
    Decode { reason: String },
    #[error("cancelled")]
    Cancelled,
}

/// How long the server should keep the model loaded after a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeepAlive {
    /// Keep resident until told otherwise.
    #[default]
    Indefinite,
    /// Unload as soon as the response is produced.
    UnloadNow,
    /// Server duration string such as `"5m"`.
    Duration(String),
}

impl Serialize for KeepAlive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Indefinite => serializer.serialize_i64(-1),
            Self::UnloadNow => serializer.serialize_i64(0),
            Self::Duration(value) => serializer.serialize_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateOptions {
    pub temperature: f64,
    pub num_ctx: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            num_ctx: 32768,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
    pub options: GenerateOptions,
    pub keep_alive: KeepAlive,
}

impl GenerateRequest {
    /// Non-streaming JSON-mode request.
    pub fn json(model: impl Into<String>, system: Option<String>, prompt: String) -> Self {
        Self {
            model: model.into(),
            system,
            prompt,
            stream: false,
            format: "json".to_string(),
            options: GenerateOptions::default(),
            keep_alive: KeepAlive::Indefinite,
        }
    }

    /// Empty-prompt request that only evicts `model` from server memory.
    pub fn unload(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: String::new(),
            stream: false,
            format: String::new(),
            options: GenerateOptions::default(),
            keep_alive: KeepAlive::UnloadNow,
        }
    }

    pub fn is_unload(&self) -> bool {
        self.prompt.is_empty() && self.keep_alive == KeepAlive::UnloadNow
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub eval_duration: u64,
    #[serde(default)]
    pub load_duration: u64,
    #[serde(default)]
    pub total_duration: u64,
}

impl GenerateResponse {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }
}

/// A model server the review pipeline can talk to.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Verifies the server answers and has `model` available.
    async fn check(&self, model: &str, cancel: &CancellationToken) -> Result<(), LlmError>;

    async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, LlmError>;
}
