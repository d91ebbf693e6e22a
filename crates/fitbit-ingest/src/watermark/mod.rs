//! Watermark tracking for incremental ingestion
//!
//! Each (metric, user) key has a watermark: midnight of the first day not
//! yet ingested. Watermarks live in two places at once, a plain text file
//! per key and the configured datastore, and reads take the maximum of
//! whichever ports answer. A stale or deleted file therefore never rewinds
//! ingestion, and a wiped datastore is healed from the files.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, warn};

use crate::config::ensure_dir;
use crate::error::{IngestError, Result};
use crate::models::{MetricKind, TIMESTAMP_FORMAT};
use crate::storage::MetricStore;

pub struct WatermarkStore {
    dir: PathBuf,
    store: Arc<dyn MetricStore>,
    default_start: NaiveDateTime,
}

impl WatermarkStore {
    /// Create a store rooted at `dir`, backed by `store` as the second port.
    /// Keys never seen by either port start at `default_start`.
    pub fn new(
        dir: PathBuf,
        store: Arc<dyn MetricStore>,
        default_start: NaiveDateTime,
    ) -> Result<Self> {
        ensure_dir(&dir)?;
        Ok(Self {
            dir,
            store,
            default_start,
        })
    }

    /// Path of the file port for one key
    pub fn file_path(&self, kind: MetricKind, user_id: &str) -> PathBuf {
        self.dir
            .join(format!("last_timestamp_{}_user_{}.txt", kind.name(), user_id))
    }

    /// Effective watermark: max of both ports, or the configured start
    pub async fn get(&self, kind: MetricKind, user_id: &str) -> Result<NaiveDateTime> {
        let from_file = self.read_file(kind, user_id);
        let from_store = self.store.read_watermark(kind, user_id).await?;

        let effective = match (from_file, from_store) {
            (Some(f), Some(s)) => f.max(s),
            (Some(f), None) => f,
            (None, Some(s)) => s,
            (None, None) => self.default_start,
        };
        debug!(
            "Watermark for {}/user {}: {}",
            kind.name(),
            user_id,
            effective.format(TIMESTAMP_FORMAT)
        );
        Ok(effective)
    }

    /// Record a new watermark on both ports. Repeating the same value is
    /// harmless; reads only ever move forward via the max rule.
    pub async fn set(
        &self,
        kind: MetricKind,
        user_id: &str,
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        self.write_file(kind, user_id, timestamp)?;
        self.store.write_watermark(kind, user_id, timestamp).await
    }

    /// Rewind every key to `timestamp`.
    ///
    /// Files are deleted first; any failure aborts the whole reset before
    /// the datastore is touched, so a partial file sweep can never lower
    /// the effective watermark on its own. The datastore is then re-seeded
    /// for all keys in one transaction.
    pub async fn reset(
        &self,
        keys: &[(MetricKind, String)],
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        for (kind, user_id) in keys {
            let path = self.file_path(*kind, user_id);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| {
                    IngestError::watermark(format!(
                        "Failed to remove {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }
        self.store.seed_watermarks(keys, timestamp).await
    }

    fn read_file(&self, kind: MetricKind, user_id: &str) -> Option<NaiveDateTime> {
        let path = self.file_path(kind, user_id);
        let raw = std::fs::read_to_string(&path).ok()?;
        match NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT) {
            Ok(ts) => Some(ts),
            Err(e) => {
                // Unreadable file port; the datastore port still answers
                warn!("Ignoring corrupt watermark file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_file(&self, kind: MetricKind, user_id: &str, timestamp: NaiveDateTime) -> Result<()> {
        let path = self.file_path(kind, user_id);
        std::fs::write(&path, timestamp.format(TIMESTAMP_FORMAT).to_string()).map_err(|e| {
            IngestError::watermark(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}
