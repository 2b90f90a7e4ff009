//! Shared library for the PDF2Data analysis service.
//!
//! This crate provides configuration, authentication, document intake, Bedrock
//! analysis, PDF text extraction and usage recording used by the API Lambda.

pub mod analysis;
pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod secrets;
pub mod startup;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use analysis::{Analyzer, BedrockAnalyzer};
pub use auth::{require_api_key, AuthGate};
pub use config::{Config, ResolvedConfig};
pub use error::{Error, Result};
pub use extract::{PdfParser, PdfTextExtractor};
pub use ingest::{ingest, DocumentUpload, ValidatedDocument};
pub use models::{AnalysisResult, TextAnalysisRequest, UsageLogEntry};
pub use pipeline::AnalysisPipeline;
pub use secrets::{SecretCache, SecretResolver, SecretStore, SsmSecretStore};
pub use startup::validate_startup;
pub use usage::{DynamoUsageStore, UsageStore};
