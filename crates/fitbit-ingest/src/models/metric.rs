//! Metric families handled by the pipeline

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// The six metric families ingested from per-user source documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HeartRate,
    Spo2,
    Hrv,
    BreathingRate,
    ActiveZoneMinutes,
    Activity,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::HeartRate,
        MetricKind::Spo2,
        MetricKind::Hrv,
        MetricKind::BreathingRate,
        MetricKind::ActiveZoneMinutes,
        MetricKind::Activity,
    ];

    /// Canonical name, used for watermark keys and log lines
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "heart_rate",
            MetricKind::Spo2 => "spo2",
            MetricKind::Hrv => "hrv",
            MetricKind::BreathingRate => "breathing_rate",
            MetricKind::ActiveZoneMinutes => "active_zone_minutes",
            MetricKind::Activity => "activity",
        }
    }

    /// Short prefix used in source file names
    pub fn file_prefix(&self) -> &'static str {
        match self {
            MetricKind::HeartRate => "hr",
            MetricKind::Spo2 => "spo2",
            MetricKind::Hrv => "hrv",
            MetricKind::BreathingRate => "br",
            MetricKind::ActiveZoneMinutes => "azm",
            MetricKind::Activity => "activity",
        }
    }

    /// JSON key wrapping the per-day payloads inside one raw record,
    /// or None when the record itself is the payload
    pub fn envelope_key(&self) -> Option<&'static str> {
        match self {
            MetricKind::HeartRate => Some("heart_rate_day"),
            MetricKind::Hrv => Some("hrv"),
            MetricKind::BreathingRate => Some("br"),
            MetricKind::ActiveZoneMinutes => Some("activities-active-zone-minutes-intraday"),
            MetricKind::Spo2 | MetricKind::Activity => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = IngestError;

    /// Accepts both canonical names and the short file prefixes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heart_rate" | "hr" => Ok(MetricKind::HeartRate),
            "spo2" => Ok(MetricKind::Spo2),
            "hrv" => Ok(MetricKind::Hrv),
            "breathing_rate" | "br" => Ok(MetricKind::BreathingRate),
            "active_zone_minutes" | "azm" => Ok(MetricKind::ActiveZoneMinutes),
            "activity" => Ok(MetricKind::Activity),
            other => Err(IngestError::invalid_param(format!(
                "Unknown metric type: {}. Valid types: heart_rate, spo2, hrv, breathing_rate, active_zone_minutes, activity",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.name().parse::<MetricKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_prefix_aliases() {
        assert_eq!("hr".parse::<MetricKind>().unwrap(), MetricKind::HeartRate);
        assert_eq!("br".parse::<MetricKind>().unwrap(), MetricKind::BreathingRate);
        assert_eq!(
            "azm".parse::<MetricKind>().unwrap(),
            MetricKind::ActiveZoneMinutes
        );
    }

    #[test]
    fn test_unknown_metric_rejected() {
        assert!("steps".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_envelope_keys() {
        assert_eq!(MetricKind::HeartRate.envelope_key(), Some("heart_rate_day"));
        assert_eq!(MetricKind::Spo2.envelope_key(), None);
        assert_eq!(MetricKind::Activity.envelope_key(), None);
    }
}
