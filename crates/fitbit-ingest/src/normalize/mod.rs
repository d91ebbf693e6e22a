//! Normalization of raw nested metric payloads into flat records
//!
//! Each metric family has its own extraction policy over the source JSON
//! shape. A normalizer receives the per-day payload already unwrapped from
//! the family's envelope (see `MetricKind::envelope_key`) and emits zero or
//! more flat records. Granularity is per-minute for heart-rate intraday,
//! SpO2, HRV, and active-zone-minutes; one daily record for breathing rate
//! and activity.
//!
//! Failure policy: an absent field or path is null, not an error; a record
//! whose timestamp cannot be resolved is dropped with a logged warning; one
//! bad entry never aborts the rest of the payload.

pub mod time;

use log::warn;
use serde_json::Value;

use crate::models::{FlatRecord, MetricKind, MetricValues};

/// Normalizer signature: (day payload, user_id, device_id) -> flat records
pub type NormalizeFn = fn(&Value, &str, &str) -> Vec<FlatRecord>;

/// Total dispatch table from metric tag to normalizer implementation
pub fn normalizer_for(kind: MetricKind) -> NormalizeFn {
    match kind {
        MetricKind::HeartRate => heart_rate,
        MetricKind::Spo2 => spo2,
        MetricKind::Hrv => hrv,
        MetricKind::BreathingRate => breathing_rate,
        MetricKind::ActiveZoneMinutes => active_zone_minutes,
        MetricKind::Activity => activity,
    }
}

pub fn normalize(kind: MetricKind, payload: &Value, user_id: &str, device_id: &str) -> Vec<FlatRecord> {
    normalizer_for(kind)(payload, user_id, device_id)
}

fn record(user_id: &str, device_id: &str, timestamp: chrono::NaiveDateTime, values: MetricValues) -> FlatRecord {
    FlatRecord {
        user_id: user_id.to_string(),
        device_id: device_id.to_string(),
        timestamp,
        values,
    }
}

/// Heart rate: one record per intraday dataset entry (timestamp = day date +
/// entry time-of-day, each carrying the day's resting heart rate), a single
/// midnight fallback record when the day has no intraday entries, plus one
/// record per heart-rate zone.
fn heart_rate(payload: &Value, user_id: &str, device_id: &str) -> Vec<FlatRecord> {
    let mut records = Vec::new();

    let summary = payload
        .get("activities-heart")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first());
    let date = summary
        .and_then(|s| s.get("dateTime"))
        .and_then(|v| v.as_str());
    let value_obj = summary.and_then(|s| s.get("value"));
    let resting_heart_rate = value_obj
        .and_then(|v| v.get("restingHeartRate"))
        .and_then(|v| v.as_i64());

    if let (Some(date), Some(dataset)) = (
        date,
        payload
            .get("activities-heart-intraday")
            .and_then(|v| v.get("dataset"))
            .and_then(|v| v.as_array()),
    ) {
        for entry in dataset {
            let time_of_day = entry.get("time").and_then(|v| v.as_str());
            let value = entry.get("value").and_then(|v| v.as_i64());
            let (Some(time_of_day), Some(value)) = (time_of_day, value) else {
                warn!(
                    "Dropping heart_rate intraday entry for user {}: missing time or value",
                    user_id
                );
                continue;
            };
            let Some(timestamp) = time::combine_date_time(date, time_of_day) else {
                warn!(
                    "Dropping heart_rate intraday entry for user {}: unresolvable timestamp {}T{}",
                    user_id, date, time_of_day
                );
                continue;
            };
            records.push(record(
                user_id,
                device_id,
                timestamp,
                MetricValues::HeartRate {
                    value: Some(value),
                    resting_heart_rate,
                },
            ));
        }
    }

    if let Some(date) = date {
        if let Some(midnight) = time::to_utc_naive(date) {
            // A day without intraday entries still gets one summary record
            if records.is_empty() {
                records.push(record(
                    user_id,
                    device_id,
                    midnight,
                    MetricValues::HeartRate {
                        value: None,
                        resting_heart_rate,
                    },
                ));
            }

            let zones = value_obj
                .and_then(|v| v.get("heartRateZones"))
                .and_then(|v| v.as_array());
            for zone in zones.into_iter().flatten() {
                records.push(record(
                    user_id,
                    device_id,
                    midnight,
                    MetricValues::HeartRateZones {
                        zone_name: zone
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        min_hr: zone.get("min").and_then(|v| v.as_i64()),
                        max_hr: zone.get("max").and_then(|v| v.as_i64()),
                        minutes: zone.get("minutes").and_then(|v| v.as_i64()),
                        calories_out: zone.get("caloriesOut").and_then(|v| v.as_f64()),
                    },
                ));
            }
        } else {
            warn!(
                "Dropping heart_rate day for user {}: unresolvable date {}",
                user_id, date
            );
        }
    }

    records
}

/// SpO2: one record per per-minute entry
fn spo2(payload: &Value, user_id: &str, device_id: &str) -> Vec<FlatRecord> {
    let mut records = Vec::new();

    let minutes = payload.get("minutes").and_then(|v| v.as_array());
    for entry in minutes.into_iter().flatten() {
        let raw_minute = entry.get("minute").and_then(|v| v.as_str());
        let value = entry.get("value").and_then(|v| v.as_f64());
        let (Some(raw_minute), Some(value)) = (raw_minute, value) else {
            warn!(
                "Dropping spo2 minute entry for user {}: missing minute or value",
                user_id
            );
            continue;
        };
        let Some(timestamp) = time::to_utc_naive(raw_minute) else {
            warn!(
                "Dropping spo2 minute entry for user {}: unresolvable timestamp {}",
                user_id, raw_minute
            );
            continue;
        };
        records.push(record(
            user_id,
            device_id,
            timestamp,
            MetricValues::Spo2 { value },
        ));
    }

    records
}

/// HRV: one record per per-minute entry with rmssd/coverage/hf/lf
fn hrv(payload: &Value, user_id: &str, device_id: &str) -> Vec<FlatRecord> {
    let mut records = Vec::new();

    let minutes = payload.get("minutes").and_then(|v| v.as_array());
    for entry in minutes.into_iter().flatten() {
        let Some(raw_minute) = entry.get("minute").and_then(|v| v.as_str()) else {
            warn!("Dropping hrv minute entry for user {}: missing minute", user_id);
            continue;
        };
        let Some(timestamp) = time::to_utc_naive(raw_minute) else {
            warn!(
                "Dropping hrv minute entry for user {}: unresolvable timestamp {}",
                user_id, raw_minute
            );
            continue;
        };
        let value = entry.get("value");
        let field = |key: &str| value.and_then(|v| v.get(key)).and_then(|v| v.as_f64());
        records.push(record(
            user_id,
            device_id,
            timestamp,
            MetricValues::Hrv {
                rmssd: field("rmssd"),
                coverage: field("coverage"),
                hf: field("hf"),
                lf: field("lf"),
            },
        ));
    }

    records
}

/// Breathing rate: one daily record with the four sleep-stage rates
fn breathing_rate(payload: &Value, user_id: &str, device_id: &str) -> Vec<FlatRecord> {
    let raw_date = payload.get("dateTime").and_then(|v| v.as_str());
    let Some(timestamp) = raw_date.and_then(time::to_utc_naive) else {
        warn!(
            "Dropping breathing_rate day for user {}: unresolvable date {:?}",
            user_id, raw_date
        );
        return Vec::new();
    };

    let value = payload.get("value");
    let stage_rate = |stage: &str| {
        value
            .and_then(|v| v.get(stage))
            .and_then(|v| v.get("breathingRate"))
            .and_then(|v| v.as_f64())
    };

    vec![record(
        user_id,
        device_id,
        timestamp,
        MetricValues::BreathingRate {
            deep_sleep_rate: stage_rate("deepSleepSummary"),
            rem_sleep_rate: stage_rate("remSleepSummary"),
            light_sleep_rate: stage_rate("lightSleepSummary"),
            full_sleep_rate: stage_rate("fullSleepSummary"),
        },
    )]
}

/// Active zone minutes: one record per per-minute entry. A minute value may
/// be a full ISO timestamp or a bare time-of-day combined with the day date.
fn active_zone_minutes(payload: &Value, user_id: &str, device_id: &str) -> Vec<FlatRecord> {
    let mut records = Vec::new();

    let date = payload.get("dateTime").and_then(|v| v.as_str());
    let minutes = payload.get("minutes").and_then(|v| v.as_array());
    for entry in minutes.into_iter().flatten() {
        let Some(raw_minute) = entry.get("minute").and_then(|v| v.as_str()) else {
            warn!(
                "Dropping active_zone_minutes entry for user {}: missing minute",
                user_id
            );
            continue;
        };
        let timestamp = if raw_minute.contains('T') {
            time::to_utc_naive(raw_minute)
        } else {
            date.and_then(|d| time::combine_date_time(d, raw_minute))
        };
        let Some(timestamp) = timestamp else {
            warn!(
                "Dropping active_zone_minutes entry for user {}: unresolvable timestamp {}",
                user_id, raw_minute
            );
            continue;
        };
        let value = entry.get("value");
        let zone_minutes = |key: &str| {
            value
                .and_then(|v| v.get(key))
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
        };
        records.push(record(
            user_id,
            device_id,
            timestamp,
            MetricValues::ActiveZoneMinutes {
                fat_burn_minutes: zone_minutes("fatBurnActiveZoneMinutes"),
                cardio_minutes: zone_minutes("cardioActiveZoneMinutes"),
                peak_minutes: zone_minutes("peakActiveZoneMinutes"),
                active_minutes: zone_minutes("activeZoneMinutes"),
            },
        ));
    }

    records
}

/// Activity: one daily value record
fn activity(payload: &Value, user_id: &str, device_id: &str) -> Vec<FlatRecord> {
    let raw_date = payload.get("dateTime").and_then(|v| v.as_str());
    let Some(timestamp) = raw_date.and_then(time::to_utc_naive) else {
        warn!(
            "Dropping activity day for user {}: unresolvable date {:?}",
            user_id, raw_date
        );
        return Vec::new();
    };

    vec![record(
        user_id,
        device_id,
        timestamp,
        MetricValues::Activity {
            value: payload.get("value").and_then(|v| v.as_f64()),
        },
    )]
}
