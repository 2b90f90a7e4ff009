//! Plain-text extraction from PDF documents.
//!
//! Parsing is CPU bound, so it runs on the blocking pool. Malformed input is
//! the caller's fault and surfaces as a validation error, including the case
//! where the parser panics on it.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use crate::ingest::{EMPTY_FILE_MESSAGE, INVALID_FILE_MESSAGE};
use crate::{Error, Result};

/// Converts a whole PDF document into plain text.
#[async_trait]
pub trait PdfParser: Send + Sync {
    async fn to_text(&self, pdf: Bytes) -> Result<String>;
}

/// `pdf-extract` backed parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextExtractor;

/// Extract the text of every page, in page order.
pub fn extract_text(pdf: &[u8]) -> Result<String> {
    if pdf.is_empty() {
        return Err(Error::Validation(EMPTY_FILE_MESSAGE.to_string()));
    }

    pdf_extract::extract_text_from_mem(pdf).map_err(|e| {
        warn!(error = %e, pdf_bytes = pdf.len(), "PDF could not be parsed");
        Error::Validation(format!("{}: {}", INVALID_FILE_MESSAGE, e))
    })
}

#[async_trait]
impl PdfParser for PdfTextExtractor {
    async fn to_text(&self, pdf: Bytes) -> Result<String> {
        let pdf_bytes = pdf.len();

        let text = tokio::task::spawn_blocking(move || extract_text(&pdf))
            .await
            .map_err(|e| {
                warn!(error = %e, pdf_bytes, "PDF parser aborted");
                Error::Validation(INVALID_FILE_MESSAGE.to_string())
            })??;

        info!(pdf_bytes, text_chars = text.chars().count(), "PDF converted to text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_rejected() {
        let err = extract_text(b"").unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m == EMPTY_FILE_MESSAGE));
    }

    #[tokio::test]
    async fn test_garbage_is_invalid_file() {
        let err = PdfTextExtractor
            .to_text(Bytes::from_static(b"this is not a pdf at all"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.starts_with(INVALID_FILE_MESSAGE)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_truncated_pdf_is_invalid_file() {
        let err = PdfTextExtractor
            .to_text(Bytes::from_static(b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
