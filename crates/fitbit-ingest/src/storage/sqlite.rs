//! SQLite storage backend
//!
//! Row-oriented store with `users`/`devices` reference tables and one table
//! per destination. Identity keys are enforced as primary keys, so re-running
//! a day is an upsert, not a duplicate. Also hosts the watermark table used
//! as the datastore port of the watermark store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::devices::DeviceInfo;
use crate::error::{IngestError, Result};
use crate::models::{Destination, FlatRecord, MetricKind, MetricValues, TIMESTAMP_FORMAT};
use crate::storage::MetricStore;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the metrics database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| IngestError::Database(format!("Failed to open metrics database: {}", e)))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            IngestError::Database(format!("Failed to open in-memory database: {}", e))
        })?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                name TEXT,
                email TEXT
            );

            CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_type TEXT,
                model TEXT
            );

            CREATE TABLE IF NOT EXISTS heart_rate (
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_id TEXT NOT NULL REFERENCES devices(device_id),
                timestamp TEXT NOT NULL,
                value INTEGER,
                resting_heart_rate INTEGER,
                PRIMARY KEY (user_id, device_id, timestamp)
            );

            CREATE TABLE IF NOT EXISTS heart_rate_zones (
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_id TEXT NOT NULL REFERENCES devices(device_id),
                timestamp TEXT NOT NULL,
                zone_name TEXT NOT NULL,
                min_hr INTEGER,
                max_hr INTEGER,
                minutes INTEGER,
                calories_out REAL,
                PRIMARY KEY (user_id, device_id, timestamp, zone_name)
            );

            CREATE TABLE IF NOT EXISTS spo2 (
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_id TEXT NOT NULL REFERENCES devices(device_id),
                timestamp TEXT NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (user_id, device_id, timestamp)
            );

            CREATE TABLE IF NOT EXISTS hrv (
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_id TEXT NOT NULL REFERENCES devices(device_id),
                timestamp TEXT NOT NULL,
                rmssd REAL,
                coverage REAL,
                hf REAL,
                lf REAL,
                PRIMARY KEY (user_id, device_id, timestamp)
            );

            CREATE TABLE IF NOT EXISTS breathing_rate (
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_id TEXT NOT NULL REFERENCES devices(device_id),
                timestamp TEXT NOT NULL,
                deep_sleep_rate REAL,
                rem_sleep_rate REAL,
                light_sleep_rate REAL,
                full_sleep_rate REAL,
                PRIMARY KEY (user_id, device_id, timestamp)
            );

            CREATE TABLE IF NOT EXISTS active_zone_minutes (
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_id TEXT NOT NULL REFERENCES devices(device_id),
                timestamp TEXT NOT NULL,
                fat_burn_minutes INTEGER NOT NULL,
                cardio_minutes INTEGER NOT NULL,
                peak_minutes INTEGER NOT NULL,
                active_minutes INTEGER NOT NULL,
                PRIMARY KEY (user_id, device_id, timestamp)
            );

            CREATE TABLE IF NOT EXISTS activity (
                user_id TEXT NOT NULL REFERENCES users(user_id),
                device_id TEXT NOT NULL REFERENCES devices(device_id),
                timestamp TEXT NOT NULL,
                value REAL,
                PRIMARY KEY (user_id, device_id, timestamp)
            );

            CREATE TABLE IF NOT EXISTS watermarks (
                metric_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                last_processed_date TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (metric_type, user_id)
            );
            "#,
        )
        .map_err(|e| IngestError::Database(format!("Failed to initialize schema: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| IngestError::Database(format!("Connection lock poisoned: {}", e)))
    }

    /// Row count for one destination table
    pub fn count_rows(&self, destination: Destination) -> Result<i64> {
        let conn = self.conn()?;
        let sql = format!("SELECT COUNT(*) FROM {}", destination.table_name());
        conn.query_row(&sql, [], |row| row.get(0))
            .map_err(|e| IngestError::Database(format!("Failed to count rows: {}", e)))
    }

    fn upsert_record(tx: &Transaction, record: &FlatRecord) -> Result<()> {
        let ts = format_timestamp(&record.timestamp);
        match &record.values {
            MetricValues::HeartRate {
                value,
                resting_heart_rate,
            } => tx.execute(
                r#"
                INSERT INTO heart_rate (user_id, device_id, timestamp, value, resting_heart_rate)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (user_id, device_id, timestamp) DO UPDATE SET
                    value = excluded.value,
                    resting_heart_rate = excluded.resting_heart_rate
                "#,
                params![record.user_id, record.device_id, ts, value, resting_heart_rate],
            ),
            MetricValues::HeartRateZones {
                zone_name,
                min_hr,
                max_hr,
                minutes,
                calories_out,
            } => tx.execute(
                r#"
                INSERT INTO heart_rate_zones
                    (user_id, device_id, timestamp, zone_name, min_hr, max_hr, minutes, calories_out)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT (user_id, device_id, timestamp, zone_name) DO UPDATE SET
                    min_hr = excluded.min_hr,
                    max_hr = excluded.max_hr,
                    minutes = excluded.minutes,
                    calories_out = excluded.calories_out
                "#,
                params![
                    record.user_id,
                    record.device_id,
                    ts,
                    zone_name,
                    min_hr,
                    max_hr,
                    minutes,
                    calories_out
                ],
            ),
            MetricValues::Spo2 { value } => tx.execute(
                r#"
                INSERT INTO spo2 (user_id, device_id, timestamp, value)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (user_id, device_id, timestamp) DO UPDATE SET
                    value = excluded.value
                "#,
                params![record.user_id, record.device_id, ts, value],
            ),
            MetricValues::Hrv {
                rmssd,
                coverage,
                hf,
                lf,
            } => tx.execute(
                r#"
                INSERT INTO hrv (user_id, device_id, timestamp, rmssd, coverage, hf, lf)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (user_id, device_id, timestamp) DO UPDATE SET
                    rmssd = excluded.rmssd,
                    coverage = excluded.coverage,
                    hf = excluded.hf,
                    lf = excluded.lf
                "#,
                params![record.user_id, record.device_id, ts, rmssd, coverage, hf, lf],
            ),
            MetricValues::BreathingRate {
                deep_sleep_rate,
                rem_sleep_rate,
                light_sleep_rate,
                full_sleep_rate,
            } => tx.execute(
                r#"
                INSERT INTO breathing_rate
                    (user_id, device_id, timestamp, deep_sleep_rate, rem_sleep_rate,
                     light_sleep_rate, full_sleep_rate)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (user_id, device_id, timestamp) DO UPDATE SET
                    deep_sleep_rate = excluded.deep_sleep_rate,
                    rem_sleep_rate = excluded.rem_sleep_rate,
                    light_sleep_rate = excluded.light_sleep_rate,
                    full_sleep_rate = excluded.full_sleep_rate
                "#,
                params![
                    record.user_id,
                    record.device_id,
                    ts,
                    deep_sleep_rate,
                    rem_sleep_rate,
                    light_sleep_rate,
                    full_sleep_rate
                ],
            ),
            MetricValues::ActiveZoneMinutes {
                fat_burn_minutes,
                cardio_minutes,
                peak_minutes,
                active_minutes,
            } => tx.execute(
                r#"
                INSERT INTO active_zone_minutes
                    (user_id, device_id, timestamp, fat_burn_minutes, cardio_minutes,
                     peak_minutes, active_minutes)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT (user_id, device_id, timestamp) DO UPDATE SET
                    fat_burn_minutes = excluded.fat_burn_minutes,
                    cardio_minutes = excluded.cardio_minutes,
                    peak_minutes = excluded.peak_minutes,
                    active_minutes = excluded.active_minutes
                "#,
                params![
                    record.user_id,
                    record.device_id,
                    ts,
                    fat_burn_minutes,
                    cardio_minutes,
                    peak_minutes,
                    active_minutes
                ],
            ),
            MetricValues::Activity { value } => tx.execute(
                r#"
                INSERT INTO activity (user_id, device_id, timestamp, value)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (user_id, device_id, timestamp) DO UPDATE SET
                    value = excluded.value
                "#,
                params![record.user_id, record.device_id, ts, value],
            ),
        }
        .map_err(|e| {
            IngestError::Database(format!(
                "Failed to upsert {} record: {}",
                record.destination().table_name(),
                e
            ))
        })?;
        Ok(())
    }

    fn upsert_watermark(
        tx: &Transaction,
        kind: MetricKind,
        user_id: &str,
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        tx.execute(
            r#"
            INSERT INTO watermarks (metric_type, user_id, last_processed_date, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (metric_type, user_id) DO UPDATE SET
                last_processed_date = excluded.last_processed_date,
                updated_at = excluded.updated_at
            "#,
            params![
                kind.name(),
                user_id,
                format_timestamp(&timestamp),
                format_timestamp(&Utc::now().naive_utc())
            ],
        )
        .map_err(|e| IngestError::Database(format!("Failed to upsert watermark: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_user_and_device(
        &self,
        user_id: &str,
        device_id: &str,
        device: &DeviceInfo,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO users (user_id, name, email)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
            params![
                user_id,
                format!("User {}", user_id),
                format!("user{}@example.com", user_id)
            ],
        )
        .map_err(|e| IngestError::Database(format!("Failed to ensure user {}: {}", user_id, e)))?;
        conn.execute(
            r#"
            INSERT INTO devices (device_id, user_id, device_type, model)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (device_id) DO NOTHING
            "#,
            params![device_id, user_id, device.device_type, device.model],
        )
        .map_err(|e| {
            IngestError::Database(format!("Failed to ensure device {}: {}", device_id, e))
        })?;
        Ok(())
    }

    async fn upsert_group(
        &self,
        destination: Destination,
        records: &[FlatRecord],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| IngestError::Database(format!("Failed to start transaction: {}", e)))?;
        for record in records {
            if record.destination() != destination {
                return Err(IngestError::invalid_param(format!(
                    "{} record routed to {} group",
                    record.destination().table_name(),
                    destination.table_name()
                )));
            }
            Self::upsert_record(&tx, record)?;
        }
        tx.commit()
            .map_err(|e| IngestError::Database(format!("Failed to commit group: {}", e)))?;
        Ok(records.len())
    }

    async fn read_watermark(
        &self,
        kind: MetricKind,
        user_id: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_processed_date FROM watermarks WHERE metric_type = ?1 AND user_id = ?2",
                params![kind.name(), user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| IngestError::Database(format!("Failed to read watermark: {}", e)))?;
        raw.map(|s| parse_timestamp(&s)).transpose()
    }

    async fn write_watermark(
        &self,
        kind: MetricKind,
        user_id: &str,
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| IngestError::Database(format!("Failed to start transaction: {}", e)))?;
        Self::upsert_watermark(&tx, kind, user_id, timestamp)?;
        tx.commit()
            .map_err(|e| IngestError::Database(format!("Failed to commit watermark: {}", e)))
    }

    async fn seed_watermarks(
        &self,
        keys: &[(MetricKind, String)],
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| IngestError::Database(format!("Failed to start transaction: {}", e)))?;
        for (kind, user_id) in keys {
            Self::upsert_watermark(&tx, *kind, user_id, timestamp)?;
        }
        tx.commit()
            .map_err(|e| IngestError::Database(format!("Failed to commit watermark seed: {}", e)))
    }

    async fn clear_metrics(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| IngestError::Database(format!("Failed to start transaction: {}", e)))?;
        for destination in Destination::ALL {
            let sql = format!("DELETE FROM {}", destination.table_name());
            tx.execute(&sql, [])
                .map_err(|e| IngestError::Database(format!("Failed to clear metrics: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| IngestError::Database(format!("Failed to commit clear: {}", e)))
    }
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| IngestError::Database(format!("Invalid stored timestamp {:?}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_device() -> DeviceInfo {
        DeviceInfo {
            device_type: "fitbit".to_string(),
            model: "charge6".to_string(),
        }
    }

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 5)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    async fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .ensure_user_and_device("1", "dev-1", &test_device())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_ensure_user_and_device_is_idempotent() {
        let store = seeded_store().await;
        store
            .ensure_user_and_device("1", "dev-1", &test_device())
            .await
            .unwrap();

        let conn = store.conn().unwrap();
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        let devices: i64 = conn
            .query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))
            .unwrap();
        assert_eq!(users, 1);
        assert_eq!(devices, 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_identity() {
        let store = seeded_store().await;
        let mut record = FlatRecord {
            user_id: "1".to_string(),
            device_id: "dev-1".to_string(),
            timestamp: ts(8, 0),
            values: MetricValues::Spo2 { value: 94.0 },
        };
        store
            .upsert_group(Destination::Spo2, std::slice::from_ref(&record))
            .await
            .unwrap();

        record.values = MetricValues::Spo2 { value: 96.5 };
        store
            .upsert_group(Destination::Spo2, &[record])
            .await
            .unwrap();

        assert_eq!(store.count_rows(Destination::Spo2).unwrap(), 1);
        let conn = store.conn().unwrap();
        let value: f64 = conn
            .query_row("SELECT value FROM spo2", [], |row| row.get(0))
            .unwrap();
        assert!((value - 96.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_zone_rows_keyed_by_zone_name() {
        let store = seeded_store().await;
        let zone = |name: &str| FlatRecord {
            user_id: "1".to_string(),
            device_id: "dev-1".to_string(),
            timestamp: ts(0, 0),
            values: MetricValues::HeartRateZones {
                zone_name: name.to_string(),
                min_hr: Some(30),
                max_hr: Some(100),
                minutes: Some(10),
                calories_out: Some(120.5),
            },
        };
        store
            .upsert_group(
                Destination::HeartRateZones,
                &[zone("Out of Range"), zone("Fat Burn"), zone("Cardio")],
            )
            .await
            .unwrap();

        assert_eq!(store.count_rows(Destination::HeartRateZones).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_group_rolls_back_on_failure() {
        let store = seeded_store().await;
        let good = FlatRecord {
            user_id: "1".to_string(),
            device_id: "dev-1".to_string(),
            timestamp: ts(8, 0),
            values: MetricValues::Spo2 { value: 94.0 },
        };
        let misrouted = FlatRecord {
            user_id: "1".to_string(),
            device_id: "dev-1".to_string(),
            timestamp: ts(8, 1),
            values: MetricValues::Activity { value: Some(1.0) },
        };

        let result = store
            .upsert_group(Destination::Spo2, &[good, misrouted])
            .await;
        assert!(result.is_err());
        assert_eq!(store.count_rows(Destination::Spo2).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_by_foreign_key() {
        let store = seeded_store().await;
        let record = FlatRecord {
            user_id: "99".to_string(),
            device_id: "dev-1".to_string(),
            timestamp: ts(8, 0),
            values: MetricValues::Spo2 { value: 94.0 },
        };
        let result = store.upsert_group(Destination::Spo2, &[record]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_watermark_round_trip() {
        let store = seeded_store().await;
        assert!(store
            .read_watermark(MetricKind::Spo2, "1")
            .await
            .unwrap()
            .is_none());

        store
            .write_watermark(MetricKind::Spo2, "1", ts(0, 0))
            .await
            .unwrap();
        assert_eq!(
            store.read_watermark(MetricKind::Spo2, "1").await.unwrap(),
            Some(ts(0, 0))
        );

        store
            .write_watermark(MetricKind::Spo2, "1", ts(12, 30))
            .await
            .unwrap();
        assert_eq!(
            store.read_watermark(MetricKind::Spo2, "1").await.unwrap(),
            Some(ts(12, 30))
        );
    }

    #[tokio::test]
    async fn test_seed_watermarks_covers_all_keys() {
        let store = seeded_store().await;
        let keys: Vec<(MetricKind, String)> = MetricKind::ALL
            .iter()
            .map(|kind| (*kind, "1".to_string()))
            .collect();
        store.seed_watermarks(&keys, ts(0, 0)).await.unwrap();

        for kind in MetricKind::ALL {
            assert_eq!(
                store.read_watermark(kind, "1").await.unwrap(),
                Some(ts(0, 0))
            );
        }
    }

    #[tokio::test]
    async fn test_clear_metrics_keeps_watermarks() {
        let store = seeded_store().await;
        let record = FlatRecord {
            user_id: "1".to_string(),
            device_id: "dev-1".to_string(),
            timestamp: ts(8, 0),
            values: MetricValues::Spo2 { value: 94.0 },
        };
        store
            .upsert_group(Destination::Spo2, &[record])
            .await
            .unwrap();
        store
            .write_watermark(MetricKind::Spo2, "1", ts(0, 0))
            .await
            .unwrap();

        store.clear_metrics().await.unwrap();

        assert_eq!(store.count_rows(Destination::Spo2).unwrap(), 0);
        assert_eq!(
            store.read_watermark(MetricKind::Spo2, "1").await.unwrap(),
            Some(ts(0, 0))
        );
    }
}
