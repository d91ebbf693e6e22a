use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for fitbit-ingest
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Source unavailable for {metric_type} user {user_id}: {path}")]
    SourceUnavailable {
        metric_type: String,
        user_id: String,
        path: String,
    },

    #[error("Malformed record for {metric_type}: {reason}")]
    MalformedRecord { metric_type: String, reason: String },

    #[error("Partial write for {day}: {failed} of {total} destination groups failed")]
    PartialWrite {
        day: NaiveDate,
        failed: usize,
        total: usize,
    },

    #[error("Storage error {status}: {message}")]
    Storage { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watermark error: {0}")]
    Watermark(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{count} ingestion key(s) failed")]
    RunFailed { count: usize },
}

pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    /// Create a source-unavailable error for a (metric, user) key
    pub fn source_unavailable(
        metric_type: impl Into<String>,
        user_id: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::SourceUnavailable {
            metric_type: metric_type.into(),
            user_id: user_id.into(),
            path: path.into(),
        }
    }

    /// Create a malformed-record error from a reason
    pub fn malformed(metric_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            metric_type: metric_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error from a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid response error from a message
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an invalid parameter error from a message
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create a watermark error from a message
    pub fn watermark(msg: impl Into<String>) -> Self {
        Self::Watermark(msg.into())
    }

    /// True when the error means "skip this key", not "abort the run"
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IngestError::source_unavailable("heart_rate", "1", "/data/hr_user1_modified.json");
        assert_eq!(
            err.to_string(),
            "Source unavailable for heart_rate user 1: /data/hr_user1_modified.json"
        );
    }

    #[test]
    fn test_partial_write_error() {
        let err = IngestError::PartialWrite {
            day: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            failed: 1,
            total: 3,
        };
        assert!(err.to_string().contains("2024-01-05"));
        assert!(err.to_string().contains("1 of 3"));
    }

    #[test]
    fn test_error_constructors() {
        let malformed = IngestError::malformed("hrv", "missing minute");
        assert!(matches!(malformed, IngestError::MalformedRecord { .. }));

        let config_err = IngestError::config("test config");
        assert!(matches!(config_err, IngestError::Config(_)));

        let response_err = IngestError::invalid_response("bad response");
        assert!(matches!(response_err, IngestError::InvalidResponse(_)));

        let param_err = IngestError::invalid_param("bad param");
        assert!(matches!(param_err, IngestError::InvalidParameter(_)));
    }

    #[test]
    fn test_skip_classification() {
        assert!(IngestError::source_unavailable("spo2", "2", "x").is_skip());
        assert!(!IngestError::config("bad").is_skip());
    }
}
