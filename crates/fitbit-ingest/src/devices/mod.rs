//! Device identity resolution
//!
//! Source records usually carry no device information; the only device in
//! scope is the default first-party wearable, which collapses to a fixed
//! sentinel id. Explicit ids pass through verbatim, and anything else gets a
//! deterministic composite id so the same inputs always map to the same
//! device.

use serde_json::Value;

/// Sentinel id for the default first-party wearable, stable across users
pub const DEFAULT_DEVICE_ID: &str = "1";

/// Metadata persisted with lazily-created device rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct DeviceResolver {
    default_device_type: String,
    default_model: String,
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self {
            default_device_type: "fitbit".to_string(),
            default_model: "charge6".to_string(),
        }
    }
}

impl DeviceResolver {
    /// Resolve the device id for one raw record:
    /// an explicit `device_id` field verbatim; the fixed sentinel for the
    /// first-party wearable; otherwise `{device_type}-{model}-{user_id}`.
    pub fn resolve(&self, raw: &Value, user_id: &str) -> String {
        if let Some(explicit) = raw.get("device_id").and_then(|v| v.as_str()) {
            return explicit.to_string();
        }

        let device_type = raw
            .get("device_type")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.default_device_type);
        let model = raw
            .get("device_model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.default_model);

        if device_type.eq_ignore_ascii_case("fitbit") && model.to_lowercase().contains("charge") {
            return DEFAULT_DEVICE_ID.to_string();
        }

        format!("{}-{}-{}", device_type, model, user_id)
    }

    /// Device metadata matching what `resolve` saw, for row-backend
    /// `ensure_exists` calls
    pub fn device_info(&self, raw: &Value) -> DeviceInfo {
        DeviceInfo {
            device_type: raw
                .get("device_type")
                .and_then(|v| v.as_str())
                .unwrap_or(&self.default_device_type)
                .to_string(),
            model: raw
                .get("device_model")
                .and_then(|v| v.as_str())
                .unwrap_or(&self.default_model)
                .to_string(),
        }
    }
}
