use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use drive_cache::config::EngineSettings;
use drive_cache::fs::Engine;
use drive_cache::google_drive::{
    GoogleDrive, InstalledFlowCredentials, ReqwestTransport, TransferExecutor,
};
use drive_cache::prelude::*;

const SETTINGS_PATH: &str = "drive_cache.json";
const CLIENT_SECRET_PATH: &str = "auth/client_secret.json";
const TOKEN_STORE_PATH: &str = "auth/token_store.json";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let folder = std::env::args().nth(1).unwrap_or_else(|| "/".to_string());

    let settings = load_settings()?;
    let credentials = InstalledFlowCredentials::new(
        Path::new(CLIENT_SECRET_PATH),
        Path::new(TOKEN_STORE_PATH),
        settings.access_mode(),
    )
    .await?;
    let executor = TransferExecutor::new(
        Arc::new(ReqwestTransport::new()),
        Arc::new(credentials),
        settings.max_tries(),
        settings.backoff_base(),
    );
    let engine = Engine::new(GoogleDrive::new(executor), settings)
        .await
        .context("could not reach the drive")?;
    info!("{}", engine);

    let stats = engine.filesystem_stats().await?;
    info!(
        "{} of {} blocks of {} bytes free",
        stats.blocks_free, stats.blocks, stats.block_size
    );
    let id = engine
        .resolve_path(&folder)
        .await
        .with_context(|| format!("could not resolve {}", folder))?;
    for child in engine.list_children(&id).await? {
        println!("{}", child);
    }

    engine.teardown().await;
    Ok(())
}

fn load_settings() -> Result<EngineSettings> {
    let path = Path::new(SETTINGS_PATH);
    if path.exists() {
        return EngineSettings::from_path(path);
    }
    warn!("{} not found, using the default settings", SETTINGS_PATH);
    Ok(EngineSettings::default())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_line_number(true)
        .with_target(true)
        .init();
    tracing::info!("tracing initialized");
}
