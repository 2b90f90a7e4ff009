//! Validation and buffering of uploaded PDF documents.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::{info, warn};

use crate::{Error, Result};

pub const PDF_MEDIA_TYPE: &str = "application/pdf";
pub const PDF_EXTENSION: &str = ".pdf";
/// Largest document accepted, matching the request body limit.
pub const MAX_DOCUMENT_BYTES: usize = 100_000_000;

pub const NO_FILE_MESSAGE: &str = "No PDF file uploaded";
pub const INVALID_FILE_MESSAGE: &str = "Invalid PDF file";
pub const EMPTY_FILE_MESSAGE: &str = "PDF file appears to be empty";

/// Metadata declared by the client for an uploaded file.
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    /// Size announced by the part headers, when present
    pub declared_len: Option<u64>,
}

/// A document that passed validation and is fully held in memory.
#[derive(Debug, Clone)]
pub struct ValidatedDocument {
    pub file_name: String,
    pub bytes: Bytes,
}

impl DocumentUpload {
    /// Both the media type and the extension must identify a PDF.
    pub fn is_pdf(&self) -> bool {
        let media_type_ok = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().eq_ignore_ascii_case(PDF_MEDIA_TYPE));

        let extension_ok = self
            .file_name
            .to_ascii_lowercase()
            .ends_with(PDF_EXTENSION);

        media_type_ok && extension_ok
    }

    /// Checks that can run before any bytes are read.
    pub fn validate(&self) -> Result<()> {
        if self.declared_len == Some(0) {
            return Err(Error::Validation(NO_FILE_MESSAGE.to_string()));
        }
        if !self.is_pdf() {
            return Err(Error::Validation(INVALID_FILE_MESSAGE.to_string()));
        }
        Ok(())
    }
}

/// Validate an upload and buffer its whole body.
///
/// Read faults are reported as validation errors rather than internal ones,
/// except for size-limit faults which stay `PayloadTooLarge`.
pub async fn ingest<S, E>(upload: DocumentUpload, body: S) -> Result<ValidatedDocument>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<Error>,
{
    upload.validate()?;

    let bytes = buffer(body, MAX_DOCUMENT_BYTES).await?;
    if bytes.is_empty() {
        warn!(file_name = %upload.file_name, "Uploaded PDF was empty after buffering");
        return Err(Error::Validation(EMPTY_FILE_MESSAGE.to_string()));
    }

    info!(
        file_name = %upload.file_name,
        declared_len = ?upload.declared_len,
        buffered_len = bytes.len(),
        "PDF file copied to memory"
    );

    Ok(ValidatedDocument {
        file_name: upload.file_name,
        bytes,
    })
}

async fn buffer<S, E>(body: S, limit: usize) -> Result<Bytes>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<Error>,
{
    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| read_fault(e.into()))?;

        if buf.len() + chunk.len() > limit {
            return Err(Error::PayloadTooLarge(format!(
                "PDF file exceeds the maximum size of {} bytes",
                limit
            )));
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(buf.freeze())
}

fn read_fault(err: Error) -> Error {
    warn!(error = %err, "Failed to read uploaded file");
    match err {
        Error::PayloadTooLarge(_) => err,
        other => Error::Validation(format!(
            "Failed to process uploaded file: {}",
            other.user_message()
        )),
    }
}
