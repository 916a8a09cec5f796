//! Second-pass verification of findings by a critic model.

use crate::error::{ParseError, StetError};
use crate::types::{Finding, Hunk};
use serde::Deserialize;
use stet_llm::{GenerateOptions, GenerateRequest, KeepAlive, ModelClient};
use tokio_util::sync::CancellationToken;

const CRITIC_SYSTEM_PROMPT: &str = "You verify code review findings. Given a diff hunk and one finding about it, decide whether the finding describes a real problem that is visible in the hunk. Respond with JSON only: {\"verdict\": \"yes\"} if the finding is correct and actionable, {\"verdict\": \"no\"} otherwise.";

#[derive(Debug, Clone, Default)]
pub struct CriticConfig {
    pub enabled: bool,
    /// Falls back to the review model when empty.
    pub model: String,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Drop,
}

#[derive(Debug, Deserialize)]
struct VerdictBody {
    verdict: String,
}

pub fn parse_verdict(response: &str) -> Result<Verdict, ParseError> {
    let body: VerdictBody = serde_json::from_str(response.trim())
        .map_err(|err| ParseError::new(format!("critic verdict: {err}")))?;
    match body.verdict.trim().to_ascii_lowercase().as_str() {
        "yes" => Ok(Verdict::Keep),
        "no" => Ok(Verdict::Drop),
        other => Err(ParseError::new(format!("unknown critic verdict: {other}"))),
    }
}

pub fn critic_prompt(finding: &Finding, hunk: &Hunk) -> String {
    let mut prompt = format!(
        "## Diff hunk ({})\n\n{}\n\n## Finding\n\nLine: {}\nSeverity: {:?}\nCategory: {:?}\nMessage: {}\n",
        hunk.file_path,
        hunk.raw_content,
        finding.effective_line(),
        finding.severity,
        finding.category,
        finding.message.trim(),
    );
    if let Some(suggestion) = finding.suggestion.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("Suggestion: {}\n", suggestion.trim()));
    }
    prompt
}

/// Asks the critic about one finding. An unparseable verdict is retried once
/// and then treated as [`Verdict::Drop`]; transport errors propagate.
pub async fn verify(
    client: &dyn ModelClient,
    config: &CriticConfig,
    review_model: &str,
    finding: &Finding,
    hunk: &Hunk,
    cancel: &CancellationToken,
) -> Result<Verdict, StetError> {
    let model = if config.model.is_empty() {
        review_model
    } else {
        config.model.as_str()
    };
    let mut request = GenerateRequest::json(
        model,
        Some(CRITIC_SYSTEM_PROMPT.to_string()),
        critic_prompt(finding, hunk),
    );
    request.options = config.options.clone();
    request.keep_alive = KeepAlive::Indefinite;

    for attempt in 0..2 {
        let response = client.generate(&request, cancel).await?;
        match parse_verdict(&response.response) {
            Ok(verdict) => return Ok(verdict),
            Err(err) => {
                tracing::debug!(id = %finding.id, attempt, error = %err, "critic verdict unparseable");
            }
        }
    }
    Ok(Verdict::Drop)
}
