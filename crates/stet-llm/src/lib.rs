pub mod client;
pub mod ollama;
pub mod retry;

pub use client::{
    GenerateOptions, GenerateRequest, GenerateResponse, KeepAlive, LlmError, ModelClient,
};
pub use ollama::OllamaClient;
pub use retry::RetryPolicy;
