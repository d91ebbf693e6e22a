//! Storage backends for normalized metric records
//!
//! Two materially different stores sit behind one contract:
//!
//! - `sqlite`: row-oriented tables with `users`/`devices` reference rows
//!   (lazy ensure-exists) and per-table identity keys for upserts
//! - `influx`: an InfluxDB-compatible HTTP store where identity rides on
//!   measurement tags and point timestamps
//!
//! Both also serve as the datastore port of the watermark store. Callers
//! never branch on backend type; `open_backend` picks the implementation
//! from configuration.

pub mod influx;
pub mod sqlite;

pub use influx::InfluxStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use log::error;
use url::Url;

use crate::config::{BackendKind, IngestConfig};
use crate::devices::DeviceInfo;
use crate::error::{IngestError, Result};
use crate::models::{Destination, FlatRecord, MetricKind};

/// Contract shared by every storage backend
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Backend name for log lines
    fn name(&self) -> &'static str;

    /// Idempotent reference-entity creation; a no-op for tag-based stores
    async fn ensure_user_and_device(
        &self,
        user_id: &str,
        device_id: &str,
        device: &DeviceInfo,
    ) -> Result<()>;

    /// Upsert one destination group in a single transaction, returning the
    /// number of records written. Every record must belong to `destination`.
    async fn upsert_group(&self, destination: Destination, records: &[FlatRecord])
        -> Result<usize>;

    /// Datastore port of the watermark store
    async fn read_watermark(&self, kind: MetricKind, user_id: &str)
        -> Result<Option<NaiveDateTime>>;

    async fn write_watermark(
        &self,
        kind: MetricKind,
        user_id: &str,
        timestamp: NaiveDateTime,
    ) -> Result<()>;

    /// Re-seed every key to the same timestamp in one shot
    async fn seed_watermarks(
        &self,
        keys: &[(MetricKind, String)],
        timestamp: NaiveDateTime,
    ) -> Result<()>;

    /// Remove all metric rows/points (watermarks are kept)
    async fn clear_metrics(&self) -> Result<()>;
}

/// Outcome of one grouped write call
#[derive(Debug)]
pub struct WriteReport {
    pub written: usize,
    pub group_count: usize,
    pub failed_groups: Vec<(Destination, IngestError)>,
}

impl WriteReport {
    pub fn all_committed(&self) -> bool {
        self.failed_groups.is_empty()
    }
}

/// Group records by destination and issue one upsert per group.
///
/// A failing group is rolled back by the backend and reported here; groups
/// already committed stay committed, and later groups still run.
pub async fn write_grouped(store: &dyn MetricStore, records: Vec<FlatRecord>) -> WriteReport {
    let mut groups: BTreeMap<Destination, Vec<FlatRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.destination()).or_default().push(record);
    }

    let group_count = groups.len();
    let mut written = 0;
    let mut failed_groups = Vec::new();

    for (destination, group) in groups {
        match store.upsert_group(destination, &group).await {
            Ok(count) => written += count,
            Err(e) => {
                error!(
                    "Write of {} {} records failed on {}: {}",
                    group.len(),
                    destination.table_name(),
                    store.name(),
                    e
                );
                failed_groups.push((destination, e));
            }
        }
    }

    WriteReport {
        written,
        group_count,
        failed_groups,
    }
}

/// Open the backend selected by configuration
pub fn open_backend(config: &IngestConfig) -> Result<Arc<dyn MetricStore>> {
    match config.backend {
        BackendKind::Sqlite => {
            let path = config.sqlite_path()?;
            if let Some(parent) = path.parent() {
                crate::config::ensure_dir(&parent.to_path_buf())?;
            }
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
        BackendKind::Influx => {
            let influx = config.influx()?;
            let base = Url::parse(&influx.url).map_err(|e| {
                IngestError::config(format!("Invalid influx url {:?}: {}", influx.url, e))
            })?;
            Ok(Arc::new(InfluxStore::new(
                base.as_str(),
                &influx.token,
                &influx.org,
                &influx.bucket,
            )))
        }
    }
}
