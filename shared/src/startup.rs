//! Startup checks run once before the service accepts traffic.

use tracing::{info, warn};
use uuid::Uuid;

use crate::secrets::SecretResolver;
use crate::{Config, ResolvedConfig, Result};

/// Resolve every required setting and secret up front.
///
/// Remote parameters are preloaded into the cache when deployed, then every
/// secret is read once more through the normal path. Any error here must stop
/// the process.
pub async fn validate_startup(config: &Config, secrets: &SecretResolver) -> Result<ResolvedConfig> {
    let instance_id = Uuid::new_v4();
    info!(%instance_id, env = %config.env_name, "Cold start");

    if config.is_local() {
        warn!("Application is running in LOCAL environment");
    } else {
        info!(production = config.is_production(), "Application is running in NON-LOCAL environment");
        secrets.preload().await?;
    }

    let api_key = secrets.api_key().await?;
    let feature_license_key = secrets.pdf_focus_key().await?;

    info!(%instance_id, "Required configuration is present");

    Ok(ResolvedConfig {
        config: config.clone(),
        api_key,
        feature_license_key,
    })
}
