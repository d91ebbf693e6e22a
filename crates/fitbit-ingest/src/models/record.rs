//! Canonical flat records written to storage

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Text form for record timestamps in row stores and watermark files
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Destination table (row backend) or measurement (time-series backend)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    HeartRate,
    HeartRateZones,
    Spo2,
    Hrv,
    BreathingRate,
    ActiveZoneMinutes,
    Activity,
}

impl Destination {
    pub const ALL: [Destination; 7] = [
        Destination::HeartRate,
        Destination::HeartRateZones,
        Destination::Spo2,
        Destination::Hrv,
        Destination::BreathingRate,
        Destination::ActiveZoneMinutes,
        Destination::Activity,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            Destination::HeartRate => "heart_rate",
            Destination::HeartRateZones => "heart_rate_zones",
            Destination::Spo2 => "spo2",
            Destination::Hrv => "hrv",
            Destination::BreathingRate => "breathing_rate",
            Destination::ActiveZoneMinutes => "active_zone_minutes",
            Destination::Activity => "activity",
        }
    }
}

/// Metric-specific value fields, tagged by destination.
///
/// Absent source fields become None; identity-key components (zone_name)
/// are never null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum MetricValues {
    HeartRate {
        value: Option<i64>,
        resting_heart_rate: Option<i64>,
    },
    HeartRateZones {
        zone_name: String,
        min_hr: Option<i64>,
        max_hr: Option<i64>,
        minutes: Option<i64>,
        calories_out: Option<f64>,
    },
    Spo2 {
        value: f64,
    },
    Hrv {
        rmssd: Option<f64>,
        coverage: Option<f64>,
        hf: Option<f64>,
        lf: Option<f64>,
    },
    BreathingRate {
        deep_sleep_rate: Option<f64>,
        rem_sleep_rate: Option<f64>,
        light_sleep_rate: Option<f64>,
        full_sleep_rate: Option<f64>,
    },
    ActiveZoneMinutes {
        fat_burn_minutes: i64,
        cardio_minutes: i64,
        peak_minutes: i64,
        active_minutes: i64,
    },
    Activity {
        value: Option<f64>,
    },
}

impl MetricValues {
    pub fn destination(&self) -> Destination {
        match self {
            MetricValues::HeartRate { .. } => Destination::HeartRate,
            MetricValues::HeartRateZones { .. } => Destination::HeartRateZones,
            MetricValues::Spo2 { .. } => Destination::Spo2,
            MetricValues::Hrv { .. } => Destination::Hrv,
            MetricValues::BreathingRate { .. } => Destination::BreathingRate,
            MetricValues::ActiveZoneMinutes { .. } => Destination::ActiveZoneMinutes,
            MetricValues::Activity { .. } => Destination::Activity,
        }
    }
}

/// One normalized record, identified by (user, device, timestamp, destination)
/// plus zone_name for heart-rate zones. Timestamps are UTC, timezone-naive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub user_id: String,
    pub device_id: String,
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub values: MetricValues,
}

impl FlatRecord {
    pub fn destination(&self) -> Destination {
        self.values.destination()
    }
}
