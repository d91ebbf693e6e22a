//! InfluxDB storage backend
//!
//! Talks to the v2 HTTP API directly: line protocol for writes, Flux for
//! watermark reads, the delete API for clearing. Identity is carried by
//! measurement name plus `user_id`/`device_id` tags (and `zone_name` for
//! heart-rate zones), so rewriting a point with the same tags and timestamp
//! replaces it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Response, StatusCode};

use crate::devices::DeviceInfo;
use crate::error::{IngestError, Result};
use crate::models::{Destination, FlatRecord, MetricKind, MetricValues};
use crate::storage::MetricStore;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Measurement holding watermark points, one series per (metric, user) key
const WATERMARK_MEASUREMENT: &str = "last_processed_dates";

pub struct InfluxStore {
    client: Client,
    base_url: String,
    token: String,
    org: String,
    bucket: String,
}

impl InfluxStore {
    pub fn new(base_url: &str, token: &str, org: &str, bucket: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            org: org.to_string(),
            bucket: bucket.to_string(),
        }
    }

    async fn write_lines(&self, body: String) -> Result<()> {
        let url = format!("{}/api/v2/write", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;
        Self::check_status(response, "write").await?;
        Ok(())
    }

    async fn query_flux(&self, flux: String) -> Result<String> {
        let url = format!("{}/api/v2/query", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(flux)
            .send()
            .await?;
        let response = Self::check_status(response, "query").await?;
        response.text().await.map_err(IngestError::from)
    }

    async fn check_status(response: Response, context: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                format!("{} rejected: check token and org", context)
            }
            StatusCode::NOT_FOUND => format!("{} target not found: check org and bucket", context),
            _ => {
                let body = response.text().await.unwrap_or_default();
                let mut body = body.trim().to_string();
                body.truncate(200);
                format!("{} failed: {}", context, body)
            }
        };
        Err(IngestError::Storage {
            status: status.as_u16(),
            message,
        })
    }

    fn point_line(record: &FlatRecord) -> Result<Option<String>> {
        let measurement = record.destination().table_name();
        let mut tags = format!(
            "user_id={},device_id={}",
            escape_tag(&record.user_id),
            escape_tag(&record.device_id)
        );

        let mut fields: Vec<String> = Vec::new();
        match &record.values {
            MetricValues::HeartRate {
                value,
                resting_heart_rate,
            } => {
                push_int(&mut fields, "value", *value);
                push_int(&mut fields, "resting_heart_rate", *resting_heart_rate);
            }
            MetricValues::HeartRateZones {
                zone_name,
                min_hr,
                max_hr,
                minutes,
                calories_out,
            } => {
                tags.push_str(&format!(",zone_name={}", escape_tag(zone_name)));
                push_int(&mut fields, "min_hr", *min_hr);
                push_int(&mut fields, "max_hr", *max_hr);
                push_int(&mut fields, "minutes", *minutes);
                push_float(&mut fields, "calories_out", *calories_out);
            }
            MetricValues::Spo2 { value } => {
                push_float(&mut fields, "value", Some(*value));
            }
            MetricValues::Hrv {
                rmssd,
                coverage,
                hf,
                lf,
            } => {
                push_float(&mut fields, "rmssd", *rmssd);
                push_float(&mut fields, "coverage", *coverage);
                push_float(&mut fields, "hf", *hf);
                push_float(&mut fields, "lf", *lf);
            }
            MetricValues::BreathingRate {
                deep_sleep_rate,
                rem_sleep_rate,
                light_sleep_rate,
                full_sleep_rate,
            } => {
                push_float(&mut fields, "deep_sleep_rate", *deep_sleep_rate);
                push_float(&mut fields, "rem_sleep_rate", *rem_sleep_rate);
                push_float(&mut fields, "light_sleep_rate", *light_sleep_rate);
                push_float(&mut fields, "full_sleep_rate", *full_sleep_rate);
            }
            MetricValues::ActiveZoneMinutes {
                fat_burn_minutes,
                cardio_minutes,
                peak_minutes,
                active_minutes,
            } => {
                push_int(&mut fields, "fat_burn_minutes", Some(*fat_burn_minutes));
                push_int(&mut fields, "cardio_minutes", Some(*cardio_minutes));
                push_int(&mut fields, "peak_minutes", Some(*peak_minutes));
                push_int(&mut fields, "active_minutes", Some(*active_minutes));
            }
            MetricValues::Activity { value } => {
                push_float(&mut fields, "value", *value);
            }
        }

        // A point with no fields is invalid line protocol; nothing to store
        if fields.is_empty() {
            return Ok(None);
        }

        let ns = record
            .timestamp
            .and_utc()
            .timestamp_nanos_opt()
            .ok_or_else(|| {
                IngestError::invalid_param(format!(
                    "timestamp out of range for {}: {}",
                    measurement, record.timestamp
                ))
            })?;

        Ok(Some(format!(
            "{},{} {} {}",
            measurement,
            tags,
            fields.join(","),
            ns
        )))
    }

    fn watermark_line(kind: MetricKind, user_id: &str, timestamp: NaiveDateTime) -> Result<String> {
        let now_ns = Utc::now().timestamp_nanos_opt().ok_or_else(|| {
            IngestError::watermark("current time out of nanosecond range".to_string())
        })?;
        Ok(format!(
            "{},metric_type={},user_id={} last_processed_date={} {}",
            WATERMARK_MEASUREMENT,
            escape_tag(kind.name()),
            escape_tag(user_id),
            timestamp.and_utc().timestamp(),
            now_ns
        ))
    }

    async fn delete_measurement(&self, measurement: &str) -> Result<()> {
        let url = format!("{}/api/v2/delete", self.base_url);
        let stop = Utc::now() + chrono::Duration::days(1);
        let body = serde_json::json!({
            "start": "1970-01-01T00:00:00Z",
            "stop": stop.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "predicate": format!("_measurement=\"{}\"", measurement),
        });
        let response = self
            .client
            .post(&url)
            .query(&[("org", self.org.as_str()), ("bucket", self.bucket.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .json(&body)
            .send()
            .await?;
        Self::check_status(response, "delete").await?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for InfluxStore {
    fn name(&self) -> &'static str {
        "influx"
    }

    async fn ensure_user_and_device(
        &self,
        _user_id: &str,
        _device_id: &str,
        _device: &DeviceInfo,
    ) -> Result<()> {
        // Identity lives on point tags; there is nothing to pre-create
        Ok(())
    }

    async fn upsert_group(
        &self,
        destination: Destination,
        records: &[FlatRecord],
    ) -> Result<usize> {
        let mut lines = Vec::with_capacity(records.len());
        for record in records {
            if record.destination() != destination {
                return Err(IngestError::invalid_param(format!(
                    "{} record routed to {} group",
                    record.destination().table_name(),
                    destination.table_name()
                )));
            }
            if let Some(line) = Self::point_line(record)? {
                lines.push(line);
            }
        }
        if lines.is_empty() {
            return Ok(0);
        }
        let count = lines.len();
        self.write_lines(lines.join("\n")).await?;
        Ok(count)
    }

    async fn read_watermark(
        &self,
        kind: MetricKind,
        user_id: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: -1y)
  |> filter(fn: (r) => r._measurement == "{measurement}")
  |> filter(fn: (r) => r.metric_type == "{metric}" and r.user_id == "{user}")
  |> filter(fn: (r) => r._field == "last_processed_date")
  |> last()"#,
            bucket = self.bucket,
            measurement = WATERMARK_MEASUREMENT,
            metric = kind.name(),
            user = user_id,
        );
        let csv = self.query_flux(flux).await?;
        match parse_last_value(&csv) {
            Some(secs) => {
                let timestamp = DateTime::from_timestamp(secs as i64, 0)
                    .map(|dt| dt.naive_utc())
                    .ok_or_else(|| {
                        IngestError::invalid_response(format!(
                            "watermark epoch out of range: {}",
                            secs
                        ))
                    })?;
                Ok(Some(timestamp))
            }
            None => Ok(None),
        }
    }

    async fn write_watermark(
        &self,
        kind: MetricKind,
        user_id: &str,
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        let line = Self::watermark_line(kind, user_id, timestamp)?;
        self.write_lines(line).await
    }

    async fn seed_watermarks(
        &self,
        keys: &[(MetricKind, String)],
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut lines = Vec::with_capacity(keys.len());
        for (kind, user_id) in keys {
            lines.push(Self::watermark_line(*kind, user_id, timestamp)?);
        }
        self.write_lines(lines.join("\n")).await
    }

    async fn clear_metrics(&self) -> Result<()> {
        for destination in Destination::ALL {
            self.delete_measurement(destination.table_name()).await?;
        }
        Ok(())
    }
}

/// Escape a tag value per line protocol rules
fn escape_tag(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn push_int(fields: &mut Vec<String>, key: &str, value: Option<i64>) {
    if let Some(v) = value {
        fields.push(format!("{}={}i", key, v));
    }
}

fn push_float(fields: &mut Vec<String>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        fields.push(format!("{}={}", key, v));
    }
}

/// Pull the first `_value` cell out of an annotated-CSV Flux response
fn parse_last_value(csv: &str) -> Option<f64> {
    let mut value_idx: Option<usize> = None;
    for line in csv.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cells: Vec<&str> = line.split(',').collect();
        match value_idx {
            None => value_idx = cells.iter().position(|c| *c == "_value"),
            Some(idx) => {
                if let Some(cell) = cells.get(idx) {
                    if let Ok(v) = cell.trim().parse::<f64>() {
                        return Some(v);
                    }
                }
            }
        }
    }
    None
}
