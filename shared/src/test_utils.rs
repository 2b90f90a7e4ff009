//! In-memory doubles of the service seams (available with `test-utils` feature).

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::analysis::{Analyzer, DocumentModelResponse, ModelResponse};
use crate::extract::PdfParser;
use crate::ingest::ValidatedDocument;
use crate::usage::UsageStore;
use crate::{AnalysisResult, Error, Result, UsageLogEntry};

/// Usage store held in memory; can be switched to fail writes.
#[derive(Default)]
pub struct MemoryUsageStore {
    pub entries: Mutex<Vec<UsageLogEntry>>,
    pub fail_writes: AtomicBool,
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn record(&self, entry: &UsageLogEntry) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence {
                record_id: entry.id.clone(),
                message: "ProvisionedThroughputExceededException".into(),
            });
        }
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<UsageLogEntry>> {
        Ok(self.entries.lock().await.clone())
    }
}

/// Analyzer that answers locally and counts calls.
#[derive(Default)]
pub struct StubAnalyzer {
    pub calls: AtomicUsize,
    /// When set, every call fails with this upstream message
    pub upstream_error: Option<String>,
    pub last_document_len: Mutex<Option<usize>>,
}

impl StubAnalyzer {
    pub fn failing(message: &str) -> Self {
        Self {
            upstream_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, prompt: &str, attachment: Option<String>) -> Result<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.upstream_error {
            return Err(Error::Upstream(message.clone()));
        }
        let normalized = ModelResponse::Document(DocumentModelResponse {
            text_blocks: vec![format!("Analysis of: {}", prompt)],
            input_tokens: 21,
            output_tokens: 8,
        })
        .normalize();
        Ok(AnalysisResult::from_response(prompt, normalized, attachment))
    }
}

#[async_trait]
impl Analyzer for StubAnalyzer {
    async fn analyze_text(&self, prompt: &str) -> Result<AnalysisResult> {
        self.respond(prompt, None)
    }

    async fn analyze_document(
        &self,
        document: &ValidatedDocument,
        prompt: &str,
    ) -> Result<AnalysisResult> {
        *self.last_document_len.lock().await = Some(document.bytes.len());
        self.respond(prompt, Some(document.file_name.clone()))
    }
}

/// Parser that returns fixed text and counts calls.
pub struct StubPdfParser {
    pub text: String,
    pub calls: AtomicUsize,
}

impl StubPdfParser {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PdfParser for StubPdfParser {
    async fn to_text(&self, _pdf: Bytes) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}
