//! Shared data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::Error;

pub const PROMPT_REQUIRED_MESSAGE: &str = "Analysis prompt is required";

/// Text analysis request payload.
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextAnalysisRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub prompt: String,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message(Cow::Borrowed(PROMPT_REQUIRED_MESSAGE)));
    }
    Ok(())
}

/// Check that a prompt carries something other than whitespace.
pub fn validate_prompt(prompt: &str) -> crate::Result<()> {
    not_blank(prompt).map_err(|_| Error::Validation(PROMPT_REQUIRED_MESSAGE.to_string()))
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .collect::<Vec<_>>()
            .join("; ");

        if message.is_empty() {
            Error::Validation(errors.to_string())
        } else {
            Error::Validation(message)
        }
    }
}

/// Outcome of one analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub request_id: String,
    pub prompt: String,
    pub response_text: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub processed_at_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_name: Option<String>,
}

/// Persisted usage audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageLogEntry {
    pub id: String,
    pub prompt: String,
    pub response: Option<String>,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub date_utc: DateTime<Utc>,
}

impl From<&AnalysisResult> for UsageLogEntry {
    fn from(result: &AnalysisResult) -> Self {
        Self {
            id: result.request_id.clone(),
            prompt: result.prompt.clone(),
            response: Some(result.response_text.clone()),
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            date_utc: result.processed_at_utc,
        }
    }
}
