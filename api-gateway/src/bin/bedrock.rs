//! Bedrock Lambda - Handles /api/v1/bedrock and /api/v1/pdf2data endpoints.
//!
//! Endpoints:
//! - POST /api/v1/bedrock/text-analysis - Analyze a prompt
//! - POST /api/v1/bedrock/pdf-analysis - Analyze an uploaded PDF with a prompt
//! - GET /api/v1/bedrock/usage-logs - List every usage record
//! - POST /api/v1/pdf2data/pdf2text - Convert a raw PDF body to plain text
//! - GET /health - Liveness check
//!
//! Runs under the Lambda runtime when `AWS_LAMBDA_RUNTIME_API` is set and as a
//! plain HTTP server otherwise.

use aws_config::{BehaviorVersion, Region};
use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use futures::TryStreamExt;
use serde::Deserialize;
use shared::auth::API_KEY_HEADER;
use shared::ingest::{EMPTY_FILE_MESSAGE, MAX_DOCUMENT_BYTES, NO_FILE_MESSAGE};
use shared::models::validate_prompt;
use shared::{
    ingest, require_api_key, validate_startup, AnalysisPipeline, AnalysisResult, AuthGate,
    BedrockAnalyzer, Config, DocumentUpload, DynamoUsageStore, Error, PdfParser,
    PdfTextExtractor, ResolvedConfig, SecretCache, SecretResolver, SsmSecretStore,
    TextAnalysisRequest, UsageLogEntry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_scalar::{Scalar, Servable};
use validator::Validate;

/// Application state shared across requests.
#[derive(Clone)]
struct AppState {
    pipeline: AnalysisPipeline,
    parser: Arc<dyn PdfParser>,
}

/// Query parameters accepted by the PDF endpoint.
#[derive(Debug, Deserialize)]
struct PdfAnalysisQuery {
    prompt: Option<String>,
}

/// Turn an extractor rejection into a 413 or a 400.
fn rejected(status: StatusCode, body_text: String, context: &str) -> Error {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge(body_text)
    } else {
        Error::Validation(format!("{}: {}", context, body_text))
    }
}

fn multipart_error(e: MultipartError) -> Error {
    rejected(e.status(), e.body_text(), "Failed to parse multipart data")
}

#[utoipa::path(
    post,
    path = "/api/v1/bedrock/text-analysis",
    tag = "bedrock",
    request_body = TextAnalysisRequest,
    responses(
        (status = 200, description = "Analysis completed", body = AnalysisResult),
        (status = 400, description = "Prompt missing or blank"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 413, description = "Request body too large"),
        (status = 502, description = "Bedrock service error"),
        (status = 500, description = "Internal server error")
    )
)]
async fn text_analysis(
    State(state): State<AppState>,
    payload: Result<Json<TextAnalysisRequest>, JsonRejection>,
) -> Result<Json<AnalysisResult>, Error> {
    let Json(request) =
        payload.map_err(|e| rejected(e.status(), e.body_text(), "Invalid request body"))?;
    request.validate()?;

    let result = state.pipeline.analyze_text(&request.prompt).await?;
    Ok(Json(result))
}

/// The first prompt seen wins and a query-string prompt counts as first. A
/// prompt known before the file part arrives is checked before the file is
/// buffered.
#[utoipa::path(
    post,
    path = "/api/v1/bedrock/pdf-analysis",
    tag = "bedrock",
    params(("prompt" = Option<String>, Query, description = "Analysis prompt, takes precedence over the form part")),
    request_body(
        content_type = "multipart/form-data",
        description = "PDF `file` part and a `prompt` text part"
    ),
    responses(
        (status = 200, description = "Analysis completed", body = AnalysisResult),
        (status = 400, description = "File missing, empty or not a PDF; prompt blank"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 413, description = "Upload too large"),
        (status = 502, description = "Bedrock service error"),
        (status = 500, description = "Internal server error")
    )
)]
async fn pdf_analysis(
    State(state): State<AppState>,
    Query(query): Query<PdfAnalysisQuery>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalysisResult>, Error> {
    let mut multipart =
        multipart.map_err(|e| rejected(e.status(), e.body_text(), "Invalid multipart request"))?;

    let mut document = None;
    let mut prompt = query.prompt;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                if let Some(prompt) = &prompt {
                    validate_prompt(prompt)?;
                }

                let upload = DocumentUpload {
                    file_name: field.file_name().unwrap_or_default().to_string(),
                    content_type: field.content_type().map(str::to_string),
                    declared_len: field
                        .headers()
                        .get(CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok()),
                };
                info!(file_name = %upload.file_name, "Receiving PDF upload");
                document = Some(ingest(upload, field.map_err(multipart_error)).await?);
            }
            "prompt" => {
                let text = field.text().await.map_err(multipart_error)?;
                prompt.get_or_insert(text);
            }
            _ => {}
        }
    }

    let document = document.ok_or_else(|| Error::Validation(NO_FILE_MESSAGE.to_string()))?;
    let prompt = prompt.unwrap_or_default();
    validate_prompt(&prompt)?;

    let result = state.pipeline.analyze_document(&document, &prompt).await?;
    Ok(Json(result))
}

#[utoipa::path(
    get,
    path = "/api/v1/bedrock/usage-logs",
    tag = "bedrock",
    responses(
        (status = 200, description = "Every recorded usage entry", body = [UsageLogEntry]),
        (status = 401, description = "Missing or invalid API key")
    )
)]
async fn usage_logs(State(state): State<AppState>) -> Result<Json<Vec<UsageLogEntry>>, Error> {
    Ok(Json(state.pipeline.usage_logs().await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/pdf2data/pdf2text",
    tag = "pdf2data",
    request_body(content_type = "application/pdf", description = "Raw PDF document"),
    responses(
        (status = 200, description = "Text of every page", body = String, content_type = "text/plain"),
        (status = 400, description = "Body empty or not a readable PDF"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 413, description = "Document too large")
    )
)]
async fn pdf_to_text(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<String, Error> {
    let body = body.map_err(|e| rejected(e.status(), e.body_text(), "Failed to read PDF body"))?;
    if body.is_empty() {
        return Err(Error::Validation(EMPTY_FILE_MESSAGE.to_string()));
    }

    info!(pdf_bytes = body.len(), "Converting PDF to text");
    state.parser.to_text(body).await
}

async fn health() -> &'static str {
    "Healthy"
}

struct ApiKeyAddon;

impl Modify for ApiKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "ApiKey",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PDF2Data API",
        version = "v1",
        description = "API for extracting data from PDF files"
    ),
    paths(text_analysis, pdf_analysis, usage_logs, pdf_to_text),
    components(schemas(TextAnalysisRequest, AnalysisResult, UsageLogEntry)),
    modifiers(&ApiKeyAddon),
    security(("ApiKey" = []))
)]
struct ApiDoc;

fn router(state: AppState, gate: AuthGate, expose_api_explorer: bool, body_limit: usize) -> Router {
    let app = Router::new()
        .route("/api/v1/bedrock/text-analysis", post(text_analysis))
        .route("/api/v1/bedrock/pdf-analysis", post(pdf_analysis))
        .route("/api/v1/bedrock/usage-logs", get(usage_logs))
        .route("/api/v1/pdf2data/pdf2text", post(pdf_to_text))
        .route("/health", get(health))
        .with_state(state);

    let app = if expose_api_explorer {
        app.merge(Scalar::with_url("/swagger", ApiDoc::openapi()))
    } else {
        app
    };

    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(gate, require_api_key))
}

/// Load configuration, resolve secrets and build the AWS clients.
async fn bootstrap() -> shared::Result<(ResolvedConfig, AppState)> {
    let config = Arc::new(Config::from_env()?);

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    let secrets = SecretResolver::new(
        config.clone(),
        Arc::new(SecretCache::new()),
        Arc::new(SsmSecretStore::new(aws_sdk_ssm::Client::new(&sdk_config))),
    );
    let resolved = validate_startup(&config, &secrets).await?;

    let dynamo_client = match &config.local_dynamodb_endpoint {
        Some(endpoint) => {
            let dynamo_config = aws_sdk_dynamodb::config::Builder::from(&sdk_config)
                .endpoint_url(endpoint)
                .build();
            aws_sdk_dynamodb::Client::from_conf(dynamo_config)
        }
        None => aws_sdk_dynamodb::Client::new(&sdk_config),
    };

    let usage = DynamoUsageStore::new(dynamo_client, config.usage_log_table());
    info!(table = %usage.table_name(), "Usage records table");

    let analyzer = BedrockAnalyzer::new(aws_sdk_bedrockruntime::Client::new(&sdk_config));

    let state = AppState {
        pipeline: AnalysisPipeline::new(Arc::new(analyzer), Arc::new(usage)),
        parser: Arc::new(PdfTextExtractor),
    };

    Ok((resolved, state))
}

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    let on_lambda = std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok();
    if !on_lambda {
        dotenvy::dotenv().ok();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let (resolved, state) = match bootstrap().await {
        Ok(ready) => ready,
        Err(e) => {
            error!(error = %e, "Required configuration is missing or invalid. Exiting...");
            std::process::exit(1);
        }
    };

    let config = &resolved.config;
    let app = router(
        state,
        AuthGate::new(resolved.api_key.as_str()),
        config.expose_api_explorer,
        MAX_DOCUMENT_BYTES,
    );

    if on_lambda {
        return lambda_http::run(app).await;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}
