//! Ingestion orchestrator
//!
//! Drives each (metric, user) key forward in strict day order. One step
//! reads the day at the key's watermark, normalizes it, writes it, and only
//! then advances the watermark to the next day. A day that fails to write
//! is retried on the next run because the watermark never moved; a day with
//! no records still advances, otherwise an empty day would stall the key
//! forever. Keys never interfere: a missing source file or a bad day skips
//! that key and the run carries on.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use log::{error, info};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::config::IngestConfig;
use crate::devices::{DeviceInfo, DeviceResolver};
use crate::error::{IngestError, Result};
use crate::models::MetricKind;
use crate::normalize::normalize;
use crate::source::SourceReader;
use crate::storage::{write_grouped, MetricStore};
use crate::watermark::WatermarkStore;

/// How far one run drives each key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One day per key, then stop
    Step,
    /// Keep stepping until every key reaches the horizon date
    CatchUp,
    /// Step every key, sleep, repeat until interrupted
    Follow,
}

impl FromStr for RunMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "step" => Ok(RunMode::Step),
            "catch-up" | "catchup" => Ok(RunMode::CatchUp),
            "follow" => Ok(RunMode::Follow),
            other => Err(IngestError::invalid_param(format!(
                "Unknown mode: {}. Valid modes: step, catch-up, follow",
                other
            ))),
        }
    }
}

/// Counters for one run (or one accumulated follow session)
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub keys_processed: usize,
    pub keys_skipped: usize,
    pub keys_failed: usize,
    pub days_processed: usize,
    pub records_written: usize,
}

impl IngestStats {
    fn absorb(&mut self, other: IngestStats) {
        self.keys_processed += other.keys_processed;
        self.keys_skipped += other.keys_skipped;
        self.keys_failed += other.keys_failed;
        self.days_processed += other.days_processed;
        self.records_written += other.records_written;
    }
}

struct StepReport {
    day: NaiveDate,
    written: usize,
}

/// Cooperative interrupt signal, honored between day-steps so the
/// watermark always reflects a fully committed day
#[derive(Default)]
struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.notify.notify_one();
    }

    fn requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

pub struct IngestEngine {
    source: SourceReader,
    store: Arc<dyn MetricStore>,
    watermarks: WatermarkStore,
    resolver: DeviceResolver,
    users: Vec<String>,
    horizon: NaiveDate,
    poll_interval: Duration,
    shutdown: Arc<Shutdown>,
}

impl IngestEngine {
    pub fn new(config: &IngestConfig, store: Arc<dyn MetricStore>) -> Result<Self> {
        let watermarks = WatermarkStore::new(
            config.watermark_dir.clone(),
            store.clone(),
            config.default_start(),
        )?;
        Ok(Self {
            source: SourceReader::new(config.data_dir.clone()),
            store,
            watermarks,
            resolver: DeviceResolver::default(),
            users: config.users.clone(),
            horizon: config.horizon_date,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            shutdown: Arc::new(Shutdown::default()),
        })
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    /// All (metric, user) keys this engine covers, narrowed by filters
    pub fn keys(
        &self,
        metric: Option<MetricKind>,
        user: Option<&str>,
    ) -> Vec<(MetricKind, String)> {
        let mut keys = Vec::new();
        for user_id in &self.users {
            if let Some(filter) = user {
                if filter != user_id {
                    continue;
                }
            }
            for kind in MetricKind::ALL {
                if let Some(filter) = metric {
                    if filter != kind {
                        continue;
                    }
                }
                keys.push((kind, user_id.clone()));
            }
        }
        keys
    }

    pub async fn run(
        &self,
        mode: RunMode,
        metric: Option<MetricKind>,
        user: Option<&str>,
    ) -> Result<IngestStats> {
        match mode {
            RunMode::Step => self.run_once(metric, user, false).await,
            RunMode::CatchUp => {
                self.spawn_interrupt_listener();
                self.run_once(metric, user, true).await
            }
            RunMode::Follow => {
                self.spawn_interrupt_listener();
                self.run_follow(metric, user).await
            }
        }
    }

    /// Flip the shutdown flag on Ctrl-C; the loops check it between
    /// day-steps, so the day in flight still commits and advances
    fn spawn_interrupt_listener(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing the current day");
                shutdown.request();
            }
        });
    }

    /// One pass over all keys; with `to_horizon` each key is stepped
    /// repeatedly until its watermark reaches the horizon date
    async fn run_once(
        &self,
        metric: Option<MetricKind>,
        user: Option<&str>,
        to_horizon: bool,
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        // Availability is probed for every key up front; unavailable keys
        // never reach extraction.
        let mut runnable = Vec::new();
        for (kind, user_id) in self.keys(metric, user) {
            if self.source.check_availability(kind, &user_id) {
                runnable.push((kind, user_id));
            } else {
                stats.keys_skipped += 1;
            }
        }

        for (kind, user_id) in runnable {
            if self.shutdown.requested() {
                break;
            }

            let outcome = if to_horizon {
                self.catch_up_key(kind, &user_id).await
            } else {
                self.step_key(kind, &user_id).await.map(|report| IngestStats {
                    days_processed: 1,
                    records_written: report.written,
                    ..Default::default()
                })
            };

            match outcome {
                Ok(key_stats) => {
                    stats.keys_processed += 1;
                    stats.days_processed += key_stats.days_processed;
                    stats.records_written += key_stats.records_written;
                }
                Err(e) if e.is_skip() => {
                    stats.keys_skipped += 1;
                }
                Err(e) => {
                    error!("Key {}/user {} failed: {}", kind.name(), user_id, e);
                    stats.keys_failed += 1;
                }
            }
        }

        info!(
            "Run complete: {} keys processed, {} skipped, {} failed, {} days, {} records",
            stats.keys_processed,
            stats.keys_skipped,
            stats.keys_failed,
            stats.days_processed,
            stats.records_written
        );
        Ok(stats)
    }

    /// Catch-up passes on a timer until interrupted with Ctrl-C
    async fn run_follow(
        &self,
        metric: Option<MetricKind>,
        user: Option<&str>,
    ) -> Result<IngestStats> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut total = IngestStats::default();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pass = self.run_once(metric, user, true).await?;
                    total.absorb(pass);
                }
                _ = self.shutdown.notify.notified() => {}
            }
            if self.shutdown.requested() {
                info!("Interrupted, stopping follow loop");
                return Ok(total);
            }
        }
    }

    /// Process the single day at this key's watermark
    async fn step_key(&self, kind: MetricKind, user_id: &str) -> Result<StepReport> {
        let watermark = self.watermarks.get(kind, user_id).await?;
        let day = watermark.date();

        let documents = self.source.get_data(kind, day, day, user_id)?;

        let mut records = Vec::new();
        let mut devices: BTreeMap<String, DeviceInfo> = BTreeMap::new();
        for document in &documents {
            for payload in unwrap_envelope(kind, document) {
                let device_id = self.resolver.resolve(payload, user_id);
                devices
                    .entry(device_id.clone())
                    .or_insert_with(|| self.resolver.device_info(payload));
                records.extend(normalize(kind, payload, user_id, &device_id));
            }
        }

        for (device_id, info) in &devices {
            self.store
                .ensure_user_and_device(user_id, device_id, info)
                .await?;
        }

        let report = write_grouped(self.store.as_ref(), records).await;
        if !report.all_committed() {
            return Err(IngestError::PartialWrite {
                day,
                failed: report.failed_groups.len(),
                total: report.group_count,
            });
        }

        let next = day
            .succ_opt()
            .ok_or_else(|| {
                IngestError::invalid_param(format!("Date out of range after {}", day))
            })?
            .and_time(NaiveTime::MIN);
        self.watermarks.set(kind, user_id, next).await?;

        info!(
            "Processed {} for {}/user {}: {} records",
            day,
            kind.name(),
            user_id,
            report.written
        );
        Ok(StepReport {
            day,
            written: report.written,
        })
    }

    /// Step one key until its watermark reaches the horizon date.
    /// A key already at or past the horizon takes zero steps.
    async fn catch_up_key(&self, kind: MetricKind, user_id: &str) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        loop {
            if self.shutdown.requested() {
                break;
            }
            let watermark = self.watermarks.get(kind, user_id).await?;
            if watermark.date() >= self.horizon {
                break;
            }
            let report = self.step_key(kind, user_id).await?;
            stats.days_processed += 1;
            stats.records_written += report.written;
            debug_assert!(report.day < self.horizon);
        }
        Ok(stats)
    }
}

/// Unwrap the per-day payloads from one raw source document.
///
/// Enveloped families nest their payloads under a metric-specific array
/// key; a document without that key contributes nothing. The others are
/// their own payload.
fn unwrap_envelope(kind: MetricKind, document: &Value) -> Vec<&Value> {
    match kind.envelope_key() {
        Some(key) => document
            .get(key)
            .and_then(|v| v.as_array())
            .map(|entries| entries.iter().collect())
            .unwrap_or_default(),
        None => vec![document],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_mode_parsing() {
        assert_eq!("step".parse::<RunMode>().unwrap(), RunMode::Step);
        assert_eq!("catch-up".parse::<RunMode>().unwrap(), RunMode::CatchUp);
        assert_eq!("catchup".parse::<RunMode>().unwrap(), RunMode::CatchUp);
        assert_eq!("follow".parse::<RunMode>().unwrap(), RunMode::Follow);
        assert!("sprint".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_unwrap_envelope_nested_families() {
        let document = json!({
            "user_id": 1,
            "heart_rate_day": [{"a": 1}, {"a": 2}]
        });
        let payloads = unwrap_envelope(MetricKind::HeartRate, &document);
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["a"], 1);
    }

    #[test]
    fn test_unwrap_envelope_missing_key_is_empty() {
        let document = json!({"user_id": 1});
        assert!(unwrap_envelope(MetricKind::Hrv, &document).is_empty());
    }

    #[test]
    fn test_unwrap_envelope_flat_families() {
        let document = json!({"dateTime": "2024-01-05", "value": {"avg": 95.0}});
        let payloads = unwrap_envelope(MetricKind::Spo2, &document);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["dateTime"], "2024-01-05");
    }

    #[tokio::test]
    async fn test_shutdown_stops_before_the_next_day() {
        let temp = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            data_dir: temp.path().join("data"),
            watermark_dir: temp.path().join("watermarks"),
            default_start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            horizon_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
            poll_interval_secs: 1,
            users: vec!["1".to_string()],
            backend: crate::config::BackendKind::Sqlite,
            sqlite: None,
            influx: None,
        };
        std::fs::create_dir_all(&config.data_dir).unwrap();
        let documents = json!([{
            "dateTime": "2024-01-01",
            "minutes": [{"minute": "2024-01-01T03:00:00", "value": 95.0}]
        }]);
        std::fs::write(
            config.data_dir.join("spo2_user1_modified.json"),
            documents.to_string(),
        )
        .unwrap();

        let store: Arc<dyn MetricStore> =
            Arc::new(crate::storage::SqliteStore::open_in_memory().unwrap());

        let engine = IngestEngine::new(&config, store.clone()).unwrap();
        engine.shutdown.request();
        let stats = engine.run(RunMode::CatchUp, None, None).await.unwrap();
        assert_eq!(stats.days_processed, 0);
        assert_eq!(stats.records_written, 0);

        // A fresh engine over the same fixture proves the flag was the
        // only thing holding the first one back.
        let engine = IngestEngine::new(&config, store).unwrap();
        let stats = engine.run(RunMode::CatchUp, None, None).await.unwrap();
        assert_eq!(stats.days_processed, 2);
        assert_eq!(stats.records_written, 1);
    }

    #[test]
    fn test_stats_absorb() {
        let mut total = IngestStats::default();
        total.absorb(IngestStats {
            keys_processed: 2,
            keys_skipped: 1,
            keys_failed: 0,
            days_processed: 4,
            records_written: 100,
        });
        total.absorb(IngestStats {
            keys_processed: 1,
            keys_skipped: 0,
            keys_failed: 1,
            days_processed: 1,
            records_written: 7,
        });
        assert_eq!(total.keys_processed, 3);
        assert_eq!(total.keys_failed, 1);
        assert_eq!(total.days_processed, 5);
        assert_eq!(total.records_written, 107);
    }
}
