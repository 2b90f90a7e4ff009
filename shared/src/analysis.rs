//! Document and text analysis through Amazon Bedrock.
//!
//! Two invocation shapes are supported. Plain prompts go through
//! `InvokeModel` with an Anthropic messages body; PDF documents go through
//! `Converse` with a document content block. Each shape has its own response
//! type and normalization into [`NormalizedResponse`].

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseOutput, DocumentBlock, DocumentFormat, DocumentSource,
    InferenceConfiguration, Message,
};
use aws_sdk_bedrockruntime::Client as BedrockClient;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::ingest::ValidatedDocument;
use crate::{AnalysisResult, Error, Result};

/// Model used for prompt-only analysis.
pub const TEXT_MODEL_ID: &str = "anthropic.claude-3-sonnet-20240229-v1:0";
/// Model used for PDF analysis.
pub const DOCUMENT_MODEL_ID: &str = "anthropic.claude-3-haiku-20240307-v1:0";

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const TEXT_MAX_TOKENS: u32 = 4000;
const DOCUMENT_MAX_TOKENS: i32 = 1000;
const DOCUMENT_TEMPERATURE: f32 = 0.2;
const DOCUMENT_TOP_P: f32 = 0.95;
const DOCUMENT_BLOCK_NAME: &str = "document";

pub const NO_TEXT_PLACEHOLDER: &str = "No analysis text received";
pub const NO_DOCUMENT_TEXT_PLACEHOLDER: &str = "No analysis text received from Bedrock";

/// Service that turns prompts (and optionally documents) into analysis results.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_text(&self, prompt: &str) -> Result<AnalysisResult>;

    async fn analyze_document(
        &self,
        document: &ValidatedDocument,
        prompt: &str,
    ) -> Result<AnalysisResult>;
}

/// Raw body returned by `InvokeModel` for the text model.
#[derive(Debug, Clone)]
pub struct TextModelResponse {
    pub body: String,
}

/// Content of a `Converse` reply for the document model.
#[derive(Debug, Clone, Default)]
pub struct DocumentModelResponse {
    pub text_blocks: Vec<String>,
    pub input_tokens: i32,
    pub output_tokens: i32,
}

/// Either of the two response shapes the engine produces.
#[derive(Debug, Clone)]
pub enum ModelResponse {
    Text(TextModelResponse),
    Document(DocumentModelResponse),
}

/// Response text and token usage in a shape-independent form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedResponse {
    pub text: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
}

impl ModelResponse {
    pub fn normalize(self) -> NormalizedResponse {
        match self {
            ModelResponse::Text(response) => response.normalize(),
            ModelResponse::Document(response) => response.normalize(),
        }
    }
}

impl TextModelResponse {
    /// Extract the first content block's text.
    ///
    /// A body without that shape is returned verbatim instead of failing.
    pub fn normalize(self) -> NormalizedResponse {
        let parsed: Option<Value> = serde_json::from_str(&self.body).ok();

        let (input_tokens, output_tokens) = parsed
            .as_ref()
            .map(|v| (token_count(&v["usage"]["input_tokens"]), token_count(&v["usage"]["output_tokens"])))
            .unwrap_or((0, 0));

        let first_block = parsed
            .as_ref()
            .and_then(|v| v.get("content"))
            .and_then(Value::as_array)
            .and_then(|blocks| blocks.first())
            .and_then(|block| block.get("text"));

        let text = match first_block {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) => NO_TEXT_PLACEHOLDER.to_string(),
            _ => self.body,
        };

        NormalizedResponse {
            text,
            input_tokens,
            output_tokens,
        }
    }
}

impl DocumentModelResponse {
    /// Join every non-empty text block; an empty reply becomes a placeholder.
    pub fn normalize(self) -> NormalizedResponse {
        let joined = self
            .text_blocks
            .iter()
            .filter(|t| !t.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");

        let text = match joined.trim() {
            "" => NO_DOCUMENT_TEXT_PLACEHOLDER.to_string(),
            trimmed => trimmed.to_string(),
        };

        NormalizedResponse {
            text,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

fn token_count(value: &Value) -> i32 {
    value
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or(0)
}

impl AnalysisResult {
    /// Stamp a normalized response with a fresh request id and time.
    pub fn from_response(
        prompt: &str,
        response: NormalizedResponse,
        attachment_name: Option<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            prompt: prompt.to_string(),
            response_text: response.text,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            processed_at_utc: Utc::now(),
            attachment_name,
        }
    }
}

/// Build the Anthropic messages body for a single user turn.
pub fn text_request_body(prompt: &str) -> Value {
    json!({
        "anthropic_version": ANTHROPIC_VERSION,
        "max_tokens": TEXT_MAX_TOKENS,
        "messages": [
            { "role": "user", "content": prompt }
        ]
    })
}

/// Map an SDK failure onto the service error taxonomy.
///
/// Anything the engine or the transport reported is `Upstream`; failures to
/// even build the request are `Internal`. The full error context goes to the
/// log only; `Upstream` carries a one-line message that is shown to callers.
pub fn classify_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    error!(operation, error = %DisplayErrorContext(&err), "Bedrock call failed");

    match &err {
        SdkError::ConstructionFailure(_) => Error::Internal(format!(
            "{} request could not be constructed: {}",
            operation,
            DisplayErrorContext(&err)
        )),
        SdkError::ServiceError(service) => {
            let inner = service.err();
            match (inner.code(), inner.message()) {
                (Some(code), Some(message)) => Error::Upstream(format!("{}: {}", code, message)),
                (None, Some(message)) => Error::Upstream(message.to_string()),
                _ => Error::Upstream(plain_message(&err)),
            }
        }
        _ => Error::Upstream(plain_message(&err)),
    }
}

/// The error and its immediate source, without debug output.
fn plain_message<E, R>(err: &SdkError<E, R>) -> String
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match std::error::Error::source(err) {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    }
}

/// Single user turn carrying the prompt and the PDF as a document block.
pub fn document_message(document: &ValidatedDocument, prompt: &str) -> Result<Message> {
    let document_block = DocumentBlock::builder()
        .name(DOCUMENT_BLOCK_NAME)
        .format(DocumentFormat::Pdf)
        .source(DocumentSource::Bytes(Blob::new(document.bytes.to_vec())))
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build document block: {}", e)))?;

    Message::builder()
        .role(ConversationRole::User)
        .content(ContentBlock::Text(prompt.to_string()))
        .content(ContentBlock::Document(document_block))
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build message: {}", e)))
}

pub fn document_inference_config() -> InferenceConfiguration {
    InferenceConfiguration::builder()
        .max_tokens(DOCUMENT_MAX_TOKENS)
        .temperature(DOCUMENT_TEMPERATURE)
        .top_p(DOCUMENT_TOP_P)
        .build()
}

/// Bedrock runtime backed analyzer with pinned models and limits.
pub struct BedrockAnalyzer {
    client: BedrockClient,
}

impl BedrockAnalyzer {
    pub fn new(client: BedrockClient) -> Self {
        Self { client }
    }

    async fn invoke_text_model(&self, prompt: &str) -> Result<TextModelResponse> {
        let body = serde_json::to_vec(&text_request_body(prompt))?;

        info!(model_id = TEXT_MODEL_ID, "Invoking Bedrock model for text analysis");

        let output = self
            .client
            .invoke_model()
            .model_id(TEXT_MODEL_ID)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(|e| classify_sdk_error("InvokeModel", e))?;

        let body = String::from_utf8_lossy(output.body().as_ref()).into_owned();
        debug!(response = %body, "Bedrock response");

        Ok(TextModelResponse { body })
    }

    async fn converse_with_document(
        &self,
        document: &ValidatedDocument,
        prompt: &str,
    ) -> Result<DocumentModelResponse> {
        let message = document_message(document, prompt)?;

        info!(
            model_id = DOCUMENT_MODEL_ID,
            document_bytes = document.bytes.len(),
            "Invoking Bedrock Converse with PDF"
        );

        let output = self
            .client
            .converse()
            .model_id(DOCUMENT_MODEL_ID)
            .messages(message)
            .inference_config(document_inference_config())
            .send()
            .await
            .map_err(|e| classify_sdk_error("Converse", e))?;

        let text_blocks = match output.output() {
            Some(ConverseOutput::Message(message)) => message
                .content()
                .iter()
                .filter_map(|block| block.as_text().ok().cloned())
                .collect(),
            _ => Vec::new(),
        };

        let (input_tokens, output_tokens) = output
            .usage()
            .map(|usage| (usage.input_tokens(), usage.output_tokens()))
            .unwrap_or((0, 0));

        Ok(DocumentModelResponse {
            text_blocks,
            input_tokens,
            output_tokens,
        })
    }
}

#[async_trait]
impl Analyzer for BedrockAnalyzer {
    async fn analyze_text(&self, prompt: &str) -> Result<AnalysisResult> {
        let response = ModelResponse::Text(self.invoke_text_model(prompt).await?);
        Ok(AnalysisResult::from_response(prompt, response.normalize(), None))
    }

    async fn analyze_document(
        &self,
        document: &ValidatedDocument,
        prompt: &str,
    ) -> Result<AnalysisResult> {
        let response = ModelResponse::Document(self.converse_with_document(document, prompt).await?);
        Ok(AnalysisResult::from_response(
            prompt,
            response.normalize(),
            Some(document.file_name.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_bedrockruntime::error::ErrorMetadata;
    use aws_sdk_bedrockruntime::operation::converse::ConverseError;
    use aws_sdk_bedrockruntime::types::error::ThrottlingException;
    use bytes::Bytes;

    fn text(body: &str) -> NormalizedResponse {
        ModelResponse::Text(TextModelResponse {
            body: body.to_string(),
        })
        .normalize()
    }

    #[test]
    fn test_text_response_takes_first_block() {
        let normalized = text(
            r#"{"content":[{"type":"text","text":"Hello summary"},{"type":"text","text":"ignored"}],
                "usage":{"input_tokens":11,"output_tokens":4}}"#,
        );
        assert_eq!(normalized.text, "Hello summary");
        assert_eq!(normalized.input_tokens, 11);
        assert_eq!(normalized.output_tokens, 4);
    }

    #[test]
    fn test_text_response_falls_back_to_raw_body() {
        let body = r#"{"completion":"legacy shape"}"#;
        let normalized = text(body);
        assert_eq!(normalized.text, body);
        assert_eq!(normalized.input_tokens, 0);

        let normalized = text("not json at all");
        assert_eq!(normalized.text, "not json at all");
    }

    #[test]
    fn test_text_response_empty_content_is_raw() {
        let body = r#"{"content":[]}"#;
        assert_eq!(text(body).text, body);
    }

    #[test]
    fn test_text_response_null_text_is_placeholder() {
        assert_eq!(text(r#"{"content":[{"text":null}]}"#).text, NO_TEXT_PLACEHOLDER);
    }

    #[test]
    fn test_document_blocks_are_joined() {
        let normalized = ModelResponse::Document(DocumentModelResponse {
            text_blocks: vec!["First part".into(), String::new(), "Second part\n".into()],
            input_tokens: 1200,
            output_tokens: 80,
        })
        .normalize();
        assert_eq!(normalized.text, "First part\nSecond part");
        assert_eq!(normalized.input_tokens, 1200);
        assert_eq!(normalized.output_tokens, 80);
    }

    #[test]
    fn test_empty_document_reply_is_placeholder() {
        let normalized = DocumentModelResponse {
            text_blocks: vec![String::new(), "   ".into()],
            ..Default::default()
        }
        .normalize();
        assert_eq!(normalized.text, NO_DOCUMENT_TEXT_PLACEHOLDER);

        let normalized = DocumentModelResponse::default().normalize();
        assert_eq!(normalized.text, NO_DOCUMENT_TEXT_PLACEHOLDER);
    }

    #[test]
    fn test_text_request_body_shape() {
        let body = text_request_body("Summarize: Hello world");
        assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Summarize: Hello world");
    }

    #[test]
    fn test_result_gets_unique_ids() {
        let response = NormalizedResponse {
            text: "t".into(),
            input_tokens: 1,
            output_tokens: 2,
        };
        let a = AnalysisResult::from_response("p", response.clone(), None);
        let b = AnalysisResult::from_response("p", response, Some("x.pdf".into()));
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(b.attachment_name.as_deref(), Some("x.pdf"));
    }

    #[test]
    fn test_document_message_shape() {
        let document = ValidatedDocument {
            file_name: "report.pdf".into(),
            bytes: Bytes::from_static(b"%PDF-1.7 body"),
        };
        let message = document_message(&document, "List the totals").unwrap();

        assert_eq!(message.role(), &ConversationRole::User);
        let content = message.content();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0].as_text().unwrap(), "List the totals");

        let block = content[1].as_document().unwrap();
        assert_eq!(block.name(), "document");
        assert_eq!(block.format(), &DocumentFormat::Pdf);
        let bytes = block.source().and_then(|s| s.as_bytes().ok()).unwrap();
        assert_eq!(bytes.as_ref(), b"%PDF-1.7 body");
    }

    #[test]
    fn test_document_inference_config_is_pinned() {
        let config = document_inference_config();
        assert_eq!(config.max_tokens(), Some(1000));
        assert_eq!(config.temperature(), Some(0.2));
        assert_eq!(config.top_p(), Some(0.95));
    }

    #[test]
    fn test_service_error_is_upstream_with_code() {
        let throttled = ConverseError::ThrottlingException(
            ThrottlingException::builder()
                .message("Too many requests")
                .meta(
                    ErrorMetadata::builder()
                        .code("ThrottlingException")
                        .message("Too many requests")
                        .build(),
                )
                .build(),
        );
        let err = classify_sdk_error("Converse", SdkError::<ConverseError, ()>::service_error(throttled, ()));

        assert!(matches!(err, Error::Upstream(ref m) if m == "ThrottlingException: Too many requests"));
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn test_timeout_is_upstream_without_debug_dump() {
        let err = classify_sdk_error("Converse", SdkError::<ConverseError, ()>::timeout_error("timed out"));

        match err {
            Error::Upstream(message) => {
                assert!(message.contains("timed out"));
                assert!(!message.contains("TimeoutError"));
                assert!(!message.contains('{'));
            }
            other => panic!("expected upstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_construction_failure_is_internal() {
        let err = classify_sdk_error(
            "InvokeModel",
            SdkError::<ConverseError, ()>::construction_failure("missing model id"),
        );
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(err.status_code(), 500);
    }
}
