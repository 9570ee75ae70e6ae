//! Configuration document for Video Picker
//! Holds extraction settings and the persisted clip list in config.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{PickerError, PickerResult};
use crate::types::ClipRecord;

/// The single persisted document: settings plus every recorded clip
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PickerConfig {
    /// Directory receiving extracted image sequences
    pub image_root: String,
    /// Image file extension, including the leading dot
    pub image_extension: String,
    /// Persisted clips, in the order they were recorded
    #[serde(default)]
    pub clips: Vec<ClipRecord>,
    /// ffmpeg executable used for frame extraction
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Keep only the last line of multi-line subtitles
    #[serde(default)]
    pub split_sub_lines: bool,
    /// Keys this tool does not know about, written back untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            image_root: "./images".to_string(),
            image_extension: ".png".to_string(),
            clips: Vec::new(),
            ffmpeg_path: default_ffmpeg_path(),
            split_sub_lines: false,
            extra: serde_json::Map::new(),
        }
    }
}

impl PickerConfig {
    /// Parse and validate a document
    pub fn from_json(content: &str) -> PickerResult<Self> {
        let config: PickerConfig = serde_json::from_str(content)
            .map_err(|e| PickerError::Config(format!("Failed to parse config document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> PickerResult<Self> {
        if !path.exists() {
            return Err(PickerError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> PickerResult<()> {
        if self.image_root.trim().is_empty() {
            return Err(PickerError::Config("image_root must not be empty".to_string()));
        }
        if !self.image_extension.starts_with('.') || self.image_extension.len() < 2 {
            return Err(PickerError::Config(format!(
                "image_extension must start with a dot, got {:?}",
                self.image_extension
            )));
        }
        Ok(())
    }

    pub fn to_json(&self) -> PickerResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PickerError::Config(format!("Failed to serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PickerConfig::from_json(r#"{"image_root": "img/", "image_extension": ".jpg"}"#)
            .unwrap();
        assert!(config.clips.is_empty());
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert!(!config.split_sub_lines);
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let json = r#"{
            "image_root": "img/",
            "image_extension": ".png",
            "clips": [],
            "output_dir": "./export",
            "model": {"layers": 3}
        }"#;
        let config = PickerConfig::from_json(json).unwrap();
        assert_eq!(config.extra["output_dir"], "./export");

        let written = config.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["model"]["layers"], 3);
        assert_eq!(parsed["output_dir"], "./export");
    }

    #[test]
    fn test_extension_needs_leading_dot() {
        let err = PickerConfig::from_json(r#"{"image_root": "img/", "image_extension": "png"}"#)
            .unwrap_err();
        assert!(matches!(err, PickerError::Config(_)));
    }

    #[test]
    fn test_malformed_document() {
        let err = PickerConfig::from_json(r#"{"image_root": 12"#).unwrap_err();
        assert!(matches!(err, PickerError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PickerConfig::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, PickerError::Config(_)));
    }
}
