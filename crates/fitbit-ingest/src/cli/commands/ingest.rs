//! Ingest command

use std::path::Path;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::ingest::{IngestEngine, RunMode};
use crate::storage::open_backend;

/// Run the ingestion pipeline in the given mode
pub async fn run(
    config_path: Option<&Path>,
    mode: &str,
    metric: Option<&str>,
    user: Option<&str>,
) -> Result<()> {
    let mode: RunMode = mode.parse()?;
    let (metric, user) = super::parse_filters(metric, user)?;

    let config = IngestConfig::load(config_path)?;
    let store = open_backend(&config)?;
    let engine = IngestEngine::new(&config, store)?;

    let stats = engine.run(mode, metric, user).await?;

    println!(
        "Processed {} keys ({} days, {} records), {} skipped, {} failed",
        stats.keys_processed,
        stats.days_processed,
        stats.records_written,
        stats.keys_skipped,
        stats.keys_failed
    );

    if stats.keys_failed > 0 {
        return Err(IngestError::RunFailed {
            count: stats.keys_failed,
        });
    }
    Ok(())
}
