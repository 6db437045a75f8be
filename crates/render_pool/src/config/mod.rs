//! Pool configuration
//!
//! Serde-backed settings for building pools from TOML or RON files.
//! Resource-shape parameters (stride, usage) that the settings carry are
//! passed through to the buffer factory unchanged.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::BufferUsage;
use crate::pool::{HostPoolParams, StoragePoolParams};
use crate::sizing::{BatchParams, BufferMode};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialize(String),

    /// Unsupported file format
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Settings failed validation
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// File-loadable settings
pub trait Settings: Serialize + DeserializeOwned + Default {
    /// Load settings from a `.toml` or `.ron` file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save settings to a `.toml` or `.ron` file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

fn default_batch_size() -> u32 {
    1
}

/// Sizing and lifetime settings shared by every pool kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Sizing mode
    pub mode: BufferMode,
    /// Minimum allocation size in elements
    pub base_size: u32,
    /// Batch quantum in elements; only meaningful in Batched mode
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Seconds a free buffer may sit idle before eviction; 0 disables
    #[serde(default)]
    pub ttl_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            mode: BufferMode::Precise,
            base_size: 1,
            batch_size: 1,
            ttl_seconds: 0,
        }
    }
}

impl Settings for PoolSettings {}

impl PoolSettings {
    /// Reject settings no pool could be built from
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_size == 0 {
            return Err(ConfigError::Invalid(
                "base_size must be greater than 0".into(),
            ));
        }
        if self.mode == BufferMode::Batched && self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be greater than 0 in Batched mode".into(),
            ));
        }
        Ok(())
    }

    /// Sizing policy described by these settings
    pub fn batch_params(&self) -> BatchParams {
        BatchParams {
            mode: self.mode,
            base_size: self.base_size,
            batch_size: self.batch_size.max(1),
        }
    }

    /// Eviction time-to-live described by these settings
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Parameters for a host array pool
    pub fn host_params(&self) -> HostPoolParams {
        HostPoolParams {
            batch: self.batch_params(),
            ttl: self.ttl(),
        }
    }
}

/// Settings for a device storage buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoragePoolSettings {
    /// Shared sizing and lifetime settings
    #[serde(flatten)]
    pub pool: PoolSettings,
    /// Element stride in bytes
    pub stride: u32,
}

impl Settings for StoragePoolSettings {}

impl StoragePoolSettings {
    /// Reject settings no pool could be built from
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        if self.stride == 0 {
            return Err(ConfigError::Invalid("stride must be greater than 0".into()));
        }
        Ok(())
    }

    /// Parameters for a storage pool with the given usage flags
    ///
    /// Usage is not part of the file surface; it is fixed in code by the
    /// subsystem that owns the pool.
    pub fn storage_params(&self, usage: BufferUsage) -> StoragePoolParams {
        StoragePoolParams {
            batch: self.pool.batch_params(),
            stride: self.stride,
            usage,
            ttl: self.pool.ttl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_settings() {
        let settings: StoragePoolSettings = toml::from_str(
            r#"
            mode = "Batched"
            base_size = 16
            batch_size = 8
            ttl_seconds = 5
            stride = 64
            "#,
        )
        .unwrap();

        assert!(settings.validate().is_ok());
        assert_eq!(settings.pool.mode, BufferMode::Batched);
        assert_eq!(settings.pool.batch_params().ceil_to_batch(20), 24);
        assert_eq!(settings.pool.ttl(), Duration::from_secs(5));
        assert_eq!(settings.stride, 64);
    }

    #[test]
    fn test_batch_size_defaults_to_one() {
        let settings: PoolSettings = toml::from_str(
            r#"
            mode = "Precise"
            base_size = 4
            "#,
        )
        .unwrap();

        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.ttl_seconds, 0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_degenerate_settings() {
        let zero_base = PoolSettings {
            base_size: 0,
            ..PoolSettings::default()
        };
        assert!(matches!(
            zero_base.validate(),
            Err(ConfigError::Invalid(_))
        ));

        let zero_batch = PoolSettings {
            mode: BufferMode::Batched,
            base_size: 16,
            batch_size: 0,
            ttl_seconds: 0,
        };
        assert!(matches!(zero_batch.validate(), Err(ConfigError::Invalid(_))));
    }

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("render_pool_{}_{name}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_toml_file_round_trip() {
        let settings = StoragePoolSettings {
            pool: PoolSettings {
                mode: BufferMode::Batched,
                base_size: 16,
                batch_size: 8,
                ttl_seconds: 5,
            },
            stride: 64,
        };

        let path = temp_path("settings.toml");
        settings.save_to_file(&path).unwrap();
        let loaded = StoragePoolSettings::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_ron_file_round_trip() {
        let settings = PoolSettings {
            mode: BufferMode::Precise,
            base_size: 32,
            batch_size: 1,
            ttl_seconds: 2,
        };

        let path = temp_path("settings.ron");
        settings.save_to_file(&path).unwrap();
        let loaded = PoolSettings::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let settings = PoolSettings::default();

        // save refuses the extension before touching the filesystem
        let path = temp_path("settings.json");
        assert!(matches!(
            settings.save_to_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));

        // load refuses it even when the file exists
        std::fs::write(&path, "{}").unwrap();
        let result = PoolSettings::load_from_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_storage_params_carry_usage_through() {
        let settings = StoragePoolSettings {
            pool: PoolSettings {
                mode: BufferMode::Precise,
                base_size: 8,
                batch_size: 1,
                ttl_seconds: 1,
            },
            stride: 32,
        };

        let params = settings.storage_params(BufferUsage::STORAGE | BufferUsage::COPY_DST);
        assert_eq!(params.stride, 32);
        assert_eq!(params.ttl, Duration::from_secs(1));
        assert!(params.usage.contains(BufferUsage::COPY_DST));
    }
}
