// src/config.rs

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub sampling: SamplingConfig,
    pub detector: DetectorConfig,
    pub motion: MotionConfig,
    pub heuristics: HeuristicsConfig,
    pub windows: WindowConfig,
    pub preview: PreviewConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

/// Worker binary settings: where uploads are picked up from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub input_dir: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            input_dir: "uploads".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Analysis sampling rate in frames per second.
    pub sample_fps: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { sample_fps: 5.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Remote inference endpoint for the HTTP adapter. When unset the
    /// worker binary has no detector and every job fails fast.
    pub endpoint: Option<String>,
    /// Class labels kept at the adapter boundary. Defaults are inherited
    /// from the source calibration; congestion scoring depends on them.
    pub target_classes: Vec<String>,
    pub request_timeout_s: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            target_classes: ["car", "truck", "bus", "motorcycle", "bicycle", "person"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            request_timeout_s: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Maximum corner features detected in the previous frame.
    pub max_features: usize,
    /// Minimum pixel distance between detected features.
    pub min_feature_distance: usize,
    /// Matching block size in pixels (square).
    pub block_size: usize,
    /// Search radius around each feature in the current frame.
    pub search_range: usize,
    /// Fewer confirmed features than this yields the (0, 0) fallback.
    pub min_confirmed_features: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            max_features: 300,
            min_feature_distance: 8,
            block_size: 16,
            search_range: 24,
            min_confirmed_features: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// Events below this confidence are not recorded.
    pub min_event_confidence: f64,
    /// Minimum centered span for a close-following event, in seconds.
    pub close_following_min_seconds: f64,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            min_event_confidence: 0.2,
            close_following_min_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length in seconds.
    pub window_s: u32,
    /// Compensated speed below this counts a sample as stopped.
    /// Inherited from the source calibration; do not retune casually.
    pub stopped_speed_threshold: f64,
    /// Active-track count mapping to density-index 1.0.
    pub density_normalizer: f64,
    /// Compensated speed mapping to zero low-speed pressure.
    pub speed_normalizer: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_s: 5,
            stopped_speed_threshold: 1.0,
            density_normalizer: 20.0,
            speed_normalizer: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub height: u32,
    pub fps: u32,
    pub bitrate: String,
    pub x264_preset: String,
    /// Trajectory trail length drawn behind each tracked object.
    pub trail_length: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            height: 720,
            fps: 15,
            bitrate: "2200k".to_string(),
            x264_preset: "veryfast".to_string(),
            trail_length: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the local blob store.
    pub blob_root: String,
    /// Directory where the file-backed repository keeps job state.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_root: "data/blobs".to_string(),
            data_dir: "data/jobs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_s: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_s: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "trafficlens=info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_inherited_calibration() {
        let config = Config::default();
        assert_eq!(config.windows.window_s, 5);
        assert!((config.windows.stopped_speed_threshold - 1.0).abs() < f64::EPSILON);
        assert!((config.windows.density_normalizer - 20.0).abs() < f64::EPSILON);
        assert_eq!(config.detector.target_classes.len(), 6);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: Config = serde_yaml::from_str("windows:\n  window_s: 10\n").unwrap();
        assert_eq!(config.windows.window_s, 10);
        // untouched sections keep their defaults
        assert_eq!(config.preview.fps, 15);
        assert_eq!(config.heuristics.min_event_confidence, 0.2);
    }
}
