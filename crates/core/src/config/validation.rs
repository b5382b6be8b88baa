//! Configuration validation rules.
//!
//! This module provides validation logic for `DedupConfig` values
//! after they have been loaded from environment, files, or defaults.

use http::HeaderName;
use thiserror::Error;

use crate::config::DedupConfig;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl DedupConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `location_header` or `digest_header` is not a valid field name
    /// - both headers name the same field
    /// - `max_recorded_url_bytes` is below 16 or exceeds 64KiB
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("location_header", &self.location_header), ("digest_header", &self.digest_header)] {
            if HeaderName::from_bytes(value.as_bytes()).is_err() {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: format!("'{value}' is not a valid header field name"),
                });
            }
        }

        if self.location_header.eq_ignore_ascii_case(&self.digest_header) {
            return Err(ConfigError::Invalid {
                field: "digest_header".into(),
                reason: "must differ from location_header".into(),
            });
        }

        if self.max_recorded_url_bytes < 16 {
            return Err(ConfigError::Invalid {
                field: "max_recorded_url_bytes".into(),
                reason: "must be at least 16".into(),
            });
        }
        if self.max_recorded_url_bytes > 64 * 1024 {
            return Err(ConfigError::Invalid {
                field: "max_recorded_url_bytes".into(),
                reason: "must not exceed 64KiB".into(),
            });
        }

        if !self.record_enabled && !self.resolve_enabled {
            tracing::warn!("Both record_enabled and resolve_enabled are off; responses pass through untouched");
        }

        Ok(())
    }
}
