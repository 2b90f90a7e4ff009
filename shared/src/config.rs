//! Configuration management for the analysis service.

use std::env;

use crate::{Error, Result};

/// Environment name that marks a developer machine.
const LOCAL_ENV_NAME: &str = "loc";
const PRODUCTION_ENV_NAME: &str = "prod";
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PORT: u16 = 8080;
const USAGE_LOG_TABLE: &str = "logs";

/// Deployment identity and plain settings loaded from environment variables.
///
/// Built once at process start and shared by reference; nothing reads the
/// environment after this point.
#[derive(Debug, Clone)]
pub struct Config {
    /// AWS region
    pub region: String,
    pub department_name: String,
    pub env_name: String,
    pub stage_name: String,
    pub project_name: String,
    pub component_name: String,
    /// Serve the interactive API explorer
    pub expose_api_explorer: bool,
    /// DynamoDB endpoint used when running locally
    pub local_dynamodb_endpoint: Option<String>,
    /// Shared secret, only read from the environment when local
    pub local_api_key: Option<String>,
    /// PDF library license key, only read from the environment when local
    pub local_pdf_focus_key: Option<String>,
    /// Port for the local HTTP server
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{} environment variable is not set", key)))
        };

        let env_name = required("ENV_NAME")?;
        let is_local = env_name.eq_ignore_ascii_case(LOCAL_ENV_NAME);

        let local_dynamodb_endpoint = if is_local {
            Some(required("LOCAL_DYNAMODB_ENDPOINT")?)
        } else {
            None
        };

        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("PORT is not a valid port number: {}", raw)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            region: lookup("REGION")
                .or_else(|| lookup("AWS_REGION"))
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            department_name: required("DEPARTMENT_NAME")?,
            stage_name: required("STAGE_NAME")?,
            project_name: required("PROJECT_NAME")?,
            component_name: required("COMPONENT_NAME")?,
            expose_api_explorer: lookup("EXPOSE_API_EXPLORER")
                .and_then(|raw| raw.trim().parse().ok())
                .unwrap_or(false),
            local_dynamodb_endpoint,
            local_api_key: if is_local { lookup("API_KEY") } else { None },
            local_pdf_focus_key: if is_local { lookup("PDF_FOCUS_KEY") } else { None },
            port,
            env_name,
        })
    }

    pub fn is_local(&self) -> bool {
        self.env_name.eq_ignore_ascii_case(LOCAL_ENV_NAME)
    }

    pub fn is_production(&self) -> bool {
        self.env_name.eq_ignore_ascii_case(PRODUCTION_ENV_NAME)
    }

    /// Parameter store path for a secret of this deployment.
    pub fn parameter_path(&self, param_name: &str) -> String {
        format!(
            "/{}/{}/{}/{}/{}/{}",
            self.department_name,
            self.env_name,
            self.stage_name,
            self.project_name,
            self.component_name,
            param_name
        )
    }

    /// Name of the DynamoDB table holding usage records.
    pub fn usage_log_table(&self) -> String {
        format!(
            "tbl-{}-{}-{}-{}-{}",
            self.department_name, self.env_name, self.stage_name, self.project_name, USAGE_LOG_TABLE
        )
    }
}

/// Fully resolved configuration, secrets included.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub api_key: String,
    /// Required deployment parameter; the bundled extractor does not read it.
    pub feature_license_key: String,
}

impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("config", &self.config)
            .field("api_key", &"<redacted>")
            .field("feature_license_key", &"<redacted>")
            .finish()
    }
}
