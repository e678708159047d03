//! Session options, loaded from JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::element::ElementFileFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub cutting_plane_capacity: usize,
    pub clipping_plane_capacity: usize,
    /// How many active cutting planes a renderer may enable at once.
    pub max_active_clip_planes: usize,
    pub element_file_stem: String,
    pub save_ascii: bool,
    pub numbered_file_digits: usize,
    /// Directory for saved element files; the working directory if unset.
    pub save_directory: Option<PathBuf>,
    pub default_palette: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cutting_plane_capacity: 6,
            clipping_plane_capacity: 6,
            max_active_clip_planes: 6,
            element_file_stem: "SavedElements".to_string(),
            save_ascii: true,
            numbered_file_digits: 4,
            save_directory: None,
            default_palette: None,
        }
    }
}

impl SessionOptions {
    pub fn from_json(text: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let options = Self::from_json(&text, &path.display().to_string())?;
        log::debug!("loaded options from {}: {options:?}", path.display());
        Ok(options)
    }

    #[must_use]
    pub const fn save_format(&self) -> ElementFileFormat {
        if self.save_ascii {
            ElementFileFormat::Ascii
        } else {
            ElementFileFormat::Binary
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = SessionOptions::from_json(r#"{ "save_ascii": false, "max_active_clip_planes": 2 }"#, "inline")
            .expect("options");
        assert_eq!(options.save_format(), ElementFileFormat::Binary);
        assert_eq!(options.max_active_clip_planes, 2);
        assert_eq!(options.cutting_plane_capacity, 6);
        assert_eq!(options.element_file_stem, "SavedElements");
    }

    #[test]
    fn invalid_json_is_reported_with_its_origin() {
        match SessionOptions::from_json("{ cutting_plane_capacity: 3 }", "vatr.json") {
            Err(err @ ConfigError::Parse { .. }) => assert!(err.to_string().contains("vatr.json")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let path = std::env::temp_dir().join("vatr-engine-missing-options.json");
        assert!(matches!(SessionOptions::load(&path), Err(ConfigError::Read { .. })));
    }
}
