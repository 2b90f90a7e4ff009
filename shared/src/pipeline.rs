//! Request-scoped analysis pipeline: analyze, then record.
//!
//! The two phases run strictly in order. An analysis failure means nothing is
//! recorded. A recording failure fails the whole call even though the
//! analysis itself succeeded; the result is dropped and the record id is
//! logged so the gap can be reconciled by hand.

use std::sync::Arc;
use tracing::{error, info};

use crate::analysis::Analyzer;
use crate::ingest::ValidatedDocument;
use crate::usage::UsageStore;
use crate::{AnalysisResult, Error, Result, UsageLogEntry};

#[derive(Clone)]
pub struct AnalysisPipeline {
    analyzer: Arc<dyn Analyzer>,
    usage: Arc<dyn UsageStore>,
}

impl AnalysisPipeline {
    pub fn new(analyzer: Arc<dyn Analyzer>, usage: Arc<dyn UsageStore>) -> Self {
        Self { analyzer, usage }
    }

    pub async fn analyze_text(&self, prompt: &str) -> Result<AnalysisResult> {
        info!(prompt_len = prompt.len(), "Processing text analysis");

        let result = self.analyzer.analyze_text(prompt).await.map_err(|e| {
            error!(error = %e, "Text analysis failed");
            e
        })?;

        self.record(result).await
    }

    pub async fn analyze_document(
        &self,
        document: &ValidatedDocument,
        prompt: &str,
    ) -> Result<AnalysisResult> {
        info!(
            file_name = %document.file_name,
            prompt_len = prompt.len(),
            "Processing PDF analysis"
        );

        let result = self
            .analyzer
            .analyze_document(document, prompt)
            .await
            .map_err(|e| {
                error!(error = %e, file_name = %document.file_name, "PDF analysis failed");
                e
            })?;

        self.record(result).await
    }

    pub async fn usage_logs(&self) -> Result<Vec<UsageLogEntry>> {
        self.usage.list_all().await
    }

    async fn record(&self, result: AnalysisResult) -> Result<AnalysisResult> {
        let entry = UsageLogEntry::from(&result);

        if let Err(e) = self.usage.record(&entry).await {
            error!(
                record_id = %entry.id,
                input_tokens = entry.input_tokens,
                output_tokens = entry.output_tokens,
                error = %e,
                "Analysis succeeded but usage record was not saved"
            );
            return Err(match e {
                Error::Persistence { .. } => e,
                other => Error::Persistence {
                    record_id: entry.id,
                    message: other.to_string(),
                },
            });
        }

        info!(record_id = %result.request_id, "Analysis completed");
        Ok(result)
    }
}
