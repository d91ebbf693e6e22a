//! Status command

use std::path::Path;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::ingest::IngestEngine;
use crate::models::TIMESTAMP_FORMAT;
use crate::source::SourceReader;
use crate::storage::open_backend;

/// Show per-key source availability and effective watermarks
pub async fn run(
    config_path: Option<&Path>,
    metric: Option<&str>,
    user: Option<&str>,
) -> Result<()> {
    let (metric, user) = super::parse_filters(metric, user)?;
    let config = IngestConfig::load(config_path)?;
    let store = open_backend(&config)?;
    let engine = IngestEngine::new(&config, store)?;
    let source = SourceReader::new(config.data_dir.clone());

    println!("Backend:   {}", config.backend);
    println!("Data dir:  {}", config.data_dir.display());
    println!("Users:     {}", config.users.join(", "));
    println!();
    println!(
        "{:<20} {:<8} {:<9} {}",
        "metric", "user", "source", "watermark"
    );

    for (kind, user_id) in engine.keys(metric, user) {
        let available = if source.file_path(kind, &user_id).exists() {
            "present"
        } else {
            "missing"
        };
        let watermark = engine.watermarks().get(kind, &user_id).await?;
        println!(
            "{:<20} {:<8} {:<9} {}",
            kind.name(),
            user_id,
            available,
            watermark.format(TIMESTAMP_FORMAT)
        );
    }

    Ok(())
}
