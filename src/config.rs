//! Pipeline configuration
//!
//! Every field has a default, so a YAML file only needs the values it changes:
//!
//! ```yaml
//! sync_tolerance_ms: 30
//! pcd_format: binary
//! camera_topics:
//!   - /camera/front/image_raw
//! ```

use crate::decode::MessageDecoder;
use crate::encode::{PcdFormat, DEFAULT_QUALITY};
use crate::error::ConfigError;
use crate::types::NANOS_PER_MILLI;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Largest lidar-to-camera gap that still pairs, in milliseconds
    pub sync_tolerance_ms: u64,
    /// Quality for re-encoded JPEG output, 1 to 100
    pub jpeg_quality: u8,
    pub pcd_format: PcdFormat,
    /// Reference point cloud topic; the busiest point cloud topic when unset
    pub lidar_topic: Option<String>,
    /// Camera topics to export; every image topic when empty
    pub camera_topics: Vec<String>,
    /// Leave clouds with no points out of the index sequence
    pub skip_empty_clouds: bool,
    /// Drop points with a NaN or infinite coordinate
    pub drop_non_finite: bool,
    /// Prefix scene names with the local time of the run
    pub timestamped_scene_names: bool,
    /// Bags processed in parallel; 0 uses one worker per core
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sync_tolerance_ms: 50,
            jpeg_quality: DEFAULT_QUALITY,
            pcd_format: PcdFormat::Ascii,
            lidar_topic: None,
            camera_topics: Vec::new(),
            skip_empty_clouds: false,
            drop_non_finite: true,
            timestamped_scene_names: false,
            workers: 0,
        }
    }
}

impl PipelineConfig {
    /// Load and validate a YAML config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::invalid(format!(
                "jpeg_quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }
        if self.lidar_topic.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::invalid("lidar_topic is empty"));
        }
        if self.camera_topics.iter().any(String::is_empty) {
            return Err(ConfigError::invalid("camera_topics holds an empty name"));
        }
        Ok(())
    }

    /// Sync tolerance in nanoseconds
    pub fn tolerance_ns(&self) -> u64 {
        self.sync_tolerance_ms.saturating_mul(NANOS_PER_MILLI)
    }

    pub fn decoder(&self) -> MessageDecoder {
        MessageDecoder::new(self.drop_non_finite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.sync_tolerance_ms, 50);
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.pcd_format, PcdFormat::Ascii);
        assert!(config.drop_non_finite);
        assert_eq!(config.tolerance_ns(), 50_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "sync_tolerance_ms: 15\npcd_format: binary\ncamera_topics:\n  - /cam\n",
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(
            config,
            PipelineConfig {
                sync_tolerance_ms: 15,
                pcd_format: PcdFormat::Binary,
                camera_topics: vec!["/cam".to_string()],
                ..PipelineConfig::default()
            }
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "sync_tolerance: 15\n").unwrap();
        assert!(matches!(
            PipelineConfig::from_file(&path),
            Err(ConfigError::YamlParse(_))
        ));
    }

    #[test]
    fn test_quality_out_of_range() {
        let config = PipelineConfig {
            jpeg_quality: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            PipelineConfig::from_file("/nonexistent/config.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
