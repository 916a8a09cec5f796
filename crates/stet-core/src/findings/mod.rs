//! Model output parsing, stable IDs, and schema validation.

pub mod filters;

pub use filters::{
    FilterThresholds, apply_abstention, apply_evidence, apply_fp_kill, cursor_uri,
    prompt_context,
};

use crate::error::{ParseError, ValidationError};
use crate::types::{Finding, Hunk, LineRange};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Parses a model response into findings. Accepts a JSON array, an object
/// with a `findings` array, or a single finding object.
pub fn parse_findings(response: &str) -> Result<Vec<Finding>, ParseError> {
    let text = strip_code_fence(response.trim());
    let value: Value =
        serde_json::from_str(text).map_err(|err| ParseError::new(format!("not json: {err}")))?;
    match value {
        Value::Array(items) => parse_items(items),
        Value::Object(mut object) => match object.remove("findings") {
            Some(Value::Array(items)) => parse_items(items),
            Some(_) => Err(ParseError::new("\"findings\" is not an array")),
            None => {
                let finding = serde_json::from_value::<Finding>(Value::Object(object))
                    .map_err(|err| ParseError::new(format!("object is not a finding: {err}")))?;
                // A bare object is only a finding if its content holds up;
                // otherwise the model gets its retry.
                check_content(&finding)
                    .map_err(|err| ParseError::new(format!("object is not a finding: {err}")))?;
                Ok(vec![finding])
            }
        },
        _ => Err(ParseError::new("expected a JSON array or object")),
    }
}

fn parse_items(items: Vec<Value>) -> Result<Vec<Finding>, ParseError> {
    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            serde_json::from_value(item)
                .map_err(|err| ParseError::new(format!("finding {idx}: {err}")))
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Trims and collapses internal whitespace.
pub fn stem(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex over `loc:stem(message)`, where `loc` is `file:start:end` for
/// a valid range and `file:line` (at least 1) otherwise.
pub fn stable_finding_id(
    file: &str,
    line: Option<u32>,
    range: Option<LineRange>,
    message: &str,
) -> String {
    let loc = match range.filter(LineRange::is_valid) {
        Some(range) => format!("{file}:{}:{}", range.start, range.end),
        None => format!("{file}:{}", line.unwrap_or(0).max(1)),
    };
    let mut hasher = Sha256::new();
    hasher.update(loc.as_bytes());
    hasher.update(b":");
    hasher.update(stem(message).as_bytes());
    hex::encode(hasher.finalize())
}

pub fn validate(finding: &Finding) -> Result<(), ValidationError> {
    if finding.file.trim().is_empty() {
        return Err(ValidationError {
            message: "file is empty".to_string(),
        });
    }
    check_content(finding)
}

/// Everything `validate` checks except the file, which callers may still
/// default from the hunk.
fn check_content(finding: &Finding) -> Result<(), ValidationError> {
    if finding.message.trim().is_empty() {
        return Err(ValidationError {
            message: "message is empty".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&finding.confidence) {
        return Err(ValidationError {
            message: format!("confidence {} outside [0, 1]", finding.confidence),
        });
    }
    if let Some(range) = finding.range.filter(|range| !range.is_valid()) {
        return Err(ValidationError {
            message: format!("range {}-{} is invalid", range.start, range.end),
        });
    }
    Ok(())
}

/// Fills defaults from the hunk, assigns stable IDs, and validates. Stops at
/// the first invalid finding.
pub fn assign_ids(findings: &mut [Finding], hunk: &Hunk) -> Result<(), ValidationError> {
    for finding in findings.iter_mut() {
        if finding.file.trim().is_empty() {
            finding.file.clone_from(&hunk.file_path);
        }
        if finding.confidence == 0.0 {
            finding.confidence = 1.0;
        }
        finding.id = stable_finding_id(&finding.file, finding.line, finding.range, &finding.message);
        validate(finding)?;
    }
    Ok(())
}
