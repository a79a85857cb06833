use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;

use crate::annotation::Rgb;
use crate::transform::DisplayMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightGranularity {
    #[default]
    Words,
    Rect,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub max_resident_pages: usize,
    pub pad: usize,
    pub min_selection_px: f32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "scroll_debounce_ms")]
    pub scroll_debounce: Duration,
    pub zoom_step: f32,
    pub min_zoom_multiplier: f32,
    pub max_zoom_multiplier: f32,
    pub fit_margin: f32,
    pub page_spacing: f32,
    pub display_mode: DisplayMode,
    pub highlight: HighlightGranularity,
    pub highlight_color: Rgb,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_resident_pages: 8,
            pad: 2,
            min_selection_px: 5.0,
            scroll_debounce: Duration::from_millis(30),
            zoom_step: 1.15,
            min_zoom_multiplier: 0.25,
            max_zoom_multiplier: 5.0,
            fit_margin: 0.98,
            page_spacing: 0.0,
            display_mode: DisplayMode::Default,
            highlight: HighlightGranularity::Words,
            highlight_color: Rgb::YELLOW,
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ViewerConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resident_pages == 0 {
            return Err(ConfigError::Invalid(
                "max_resident_pages must be at least 1".into(),
            ));
        }
        if !(self.zoom_step.is_finite() && self.zoom_step > 1.0) {
            return Err(ConfigError::Invalid("zoom_step must be greater than 1".into()));
        }
        if !(self.min_zoom_multiplier > 0.0 && self.min_zoom_multiplier <= self.max_zoom_multiplier)
        {
            return Err(ConfigError::Invalid(format!(
                "zoom bounds {}..{} are not a valid range",
                self.min_zoom_multiplier, self.max_zoom_multiplier
            )));
        }
        if !(self.fit_margin > 0.0 && self.fit_margin <= 1.0) {
            return Err(ConfigError::Invalid("fit_margin must be in (0, 1]".into()));
        }
        if self.min_selection_px < 0.0 || self.page_spacing < 0.0 {
            return Err(ConfigError::Invalid(
                "min_selection_px and page_spacing must not be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "max_resident_pages = 4\nscroll_debounce_ms = 50\ndisplay_mode = \"eye_care\"\nhighlight = \"rect\"\n",
        )
        .unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.max_resident_pages, 4);
        assert_eq!(config.scroll_debounce, Duration::from_millis(50));
        assert_eq!(config.display_mode, DisplayMode::EyeCare);
        assert_eq!(config.highlight, HighlightGranularity::Rect);
        assert_eq!(config.pad, 2);
        assert_eq!(config.zoom_step, 1.15);
    }

    #[test]
    fn zero_resident_pages_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_resident_pages = 0\n").unwrap();
        assert!(matches!(
            ViewerConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "pad = \"two\"\n").unwrap();
        assert!(matches!(
            ViewerConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = ViewerConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }
}
