//! Application configuration.
//!
//! One TOML file holds everything that differed between the upstream demo
//! variants: the model URL, the ordered class names and the decision
//! threshold. Required fields are validated at startup so a broken config
//! fails the process immediately instead of surfacing mid-prediction.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::sensors::Facing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("class_names must not be empty")]
    EmptyClassNames,
    #[error("image_size must be greater than zero")]
    InvalidImageSize,
    #[error("confidence_threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f32),
}

/// Validated, immutable application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the model; the artifact is fetched from `{model_url}model.onnx`.
    pub model_url: String,
    /// Ordered class labels, index = class id. May be shorter than the model
    /// output; out-of-range ids degrade to a synthesized `class {id}` label.
    pub class_names: Vec<String>,
    /// Side length of the square frame fed to the model.
    pub image_size: u32,
    /// Minimum confidence for a decided classification.
    pub confidence_threshold: f32,
    /// V4L2 device standing in for the rear ("environment") camera.
    #[serde(default = "default_back_device")]
    pub back_camera_device: String,
    /// V4L2 device standing in for the front ("user") camera.
    #[serde(default = "default_front_device")]
    pub front_camera_device: String,
    /// Facing used when the camera is first started.
    #[serde(default)]
    pub start_facing: Facing,
    /// Preferred capture frame rate.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_model_load_timeout")]
    pub model_load_timeout_secs: u64,
    #[serde(default = "default_camera_start_timeout")]
    pub camera_start_timeout_secs: u64,
}

fn default_back_device() -> String {
    "/dev/video0".to_owned()
}

fn default_front_device() -> String {
    "/dev/video1".to_owned()
}

fn default_frame_rate() -> u32 {
    30
}

fn default_model_load_timeout() -> u64 {
    30
}

fn default_camera_start_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Read and validate the configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.class_names.is_empty() {
            return Err(ConfigError::EmptyClassNames);
        }
        if self.image_size == 0 {
            return Err(ConfigError::InvalidImageSize);
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidThreshold(self.confidence_threshold));
        }
        Ok(())
    }

    pub fn device_for(&self, facing: Facing) -> &str {
        match facing {
            Facing::Back => &self.back_camera_device,
            Facing::Front => &self.front_camera_device,
        }
    }

    pub fn model_load_timeout(&self) -> Duration {
        Duration::from_secs(self.model_load_timeout_secs)
    }

    pub fn camera_start_timeout(&self) -> Duration {
        Duration::from_secs(self.camera_start_timeout_secs)
    }
}
