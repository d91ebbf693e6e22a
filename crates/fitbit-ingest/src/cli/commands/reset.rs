//! Reset command

use std::path::Path;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::ingest::IngestEngine;
use crate::models::TIMESTAMP_FORMAT;
use crate::storage::open_backend;

/// Rewind watermarks to the configured start date, optionally wiping
/// stored metric records first
pub async fn run(
    config_path: Option<&Path>,
    wipe_data: bool,
    metric: Option<&str>,
    user: Option<&str>,
) -> Result<()> {
    let (metric, user) = super::parse_filters(metric, user)?;
    if wipe_data && (metric.is_some() || user.is_some()) {
        return Err(IngestError::invalid_param(
            "--wipe-data clears every destination; run it without --metric or --user",
        ));
    }

    let config = IngestConfig::load(config_path)?;
    let store = open_backend(&config)?;
    let engine = IngestEngine::new(&config, store.clone())?;

    if wipe_data {
        store.clear_metrics().await?;
        println!("Cleared stored metric records");
    }

    let keys = engine.keys(metric, user);
    let start = config.default_start();
    engine.watermarks().reset(&keys, start).await?;

    println!(
        "Reset {} watermarks to {}",
        keys.len(),
        start.format(TIMESTAMP_FORMAT)
    );
    Ok(())
}
