//! Source document loading and date-range filtering
//!
//! One JSON document per (metric, user), named
//! `{prefix}_user{user_id}_modified.json`. Each document is a list of
//! date-scoped raw records; the date lives at a different path per metric
//! family.

use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use log::{debug, warn};
use serde_json::Value;

use crate::error::{IngestError, Result};
use crate::models::MetricKind;

pub struct SourceReader {
    data_dir: PathBuf,
}

impl SourceReader {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Source document location for a (metric, user) key
    pub fn file_path(&self, kind: MetricKind, user_id: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_user{}_modified.json", kind.file_prefix(), user_id))
    }

    /// Upfront feasibility probe; a missing file is a per-key skip signal
    pub fn check_availability(&self, kind: MetricKind, user_id: &str) -> bool {
        let path = self.file_path(kind, user_id);
        let exists = path.exists();
        if !exists {
            warn!("Data file not found: {}", path.display());
        }
        exists
    }

    /// Load raw records for a key, filtered to the inclusive date range.
    /// Records whose embedded date cannot be parsed are excluded, never
    /// partially included.
    pub fn get_data(
        &self,
        kind: MetricKind,
        start: NaiveDate,
        end: NaiveDate,
        user_id: &str,
    ) -> Result<Vec<Value>> {
        let path = self.file_path(kind, user_id);
        if !path.exists() {
            return Err(IngestError::source_unavailable(
                kind.name(),
                user_id,
                path.display().to_string(),
            ));
        }

        let raw = fs::read_to_string(&path)?;
        let documents: Vec<Value> = serde_json::from_str(&raw)?;

        let start_str = start.format("%Y-%m-%d").to_string();
        let end_str = end.format("%Y-%m-%d").to_string();

        let total = documents.len();
        let filtered: Vec<Value> = documents
            .into_iter()
            .filter(|record| {
                record_date(kind, record)
                    .map(|d| start_str.as_str() <= d && d <= end_str.as_str())
                    .unwrap_or(false)
            })
            .collect();

        debug!(
            "Filtered {} of {} {} records for user {} between {} and {}",
            filtered.len(),
            total,
            kind,
            user_id,
            start_str,
            end_str
        );
        Ok(filtered)
    }
}

/// Extract the `YYYY-MM-DD` date of one raw record, by metric-specific path
pub fn record_date(kind: MetricKind, record: &Value) -> Option<&str> {
    let raw = match kind {
        MetricKind::Activity | MetricKind::Spo2 => record.get("dateTime")?.as_str()?,
        MetricKind::HeartRate => record
            .get("heart_rate_day")?
            .get(0)?
            .get("activities-heart")?
            .get(0)?
            .get("dateTime")?
            .as_str()?,
        MetricKind::Hrv => record
            .get("hrv")?
            .get(0)?
            .get("minutes")?
            .get(0)?
            .get("minute")?
            .as_str()?,
        MetricKind::BreathingRate => record.get("br")?.get(0)?.get("dateTime")?.as_str()?,
        MetricKind::ActiveZoneMinutes => record
            .get("activities-active-zone-minutes-intraday")?
            .get(0)?
            .get("dateTime")?
            .as_str()?,
    };
    raw.split('T').next()
}
