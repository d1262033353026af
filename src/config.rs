use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::duplicates::sensitivity;
use crate::duplicates::Sensitivities;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    #[serde(default)]
    pub sensitivity: SensitivityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Duplicate thresholds for discovery runs.
///
/// Each profile must be given in full when present; the animated one has to
/// be at least as strict as the regular one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensitivityConfig {
    #[serde(default = "Sensitivities::regular")]
    pub regular: Sensitivities,

    #[serde(default = "Sensitivities::animated")]
    pub animated: Sensitivities,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            regular: Sensitivities::regular(),
            animated: Sensitivities::animated(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file when journald is unavailable
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("favdupes")
        .join("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

fn default_catalog_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("favdupes")
        .join("catalog.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            sensitivity: SensitivityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        sensitivity::validate(&config.sensitivity.regular, &config.sensitivity.animated)
            .with_context(|| format!("Invalid sensitivity in {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("favdupes")
    }

    fn config_path() -> PathBuf {
        // Check environment variable
        if let Ok(path) = std::env::var("FAVDUPES_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.catalog_path = PathBuf::from("/tmp/catalog.json");
        config.sensitivity.regular.percept = 6.0;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.catalog_path, PathBuf::from("/tmp/catalog.json"));
        assert_eq!(loaded.sensitivity.regular.percept, 6.0);
        assert_eq!(loaded.sensitivity.animated, Sensitivities::animated());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "catalog_path = \"/data/catalog.json\"\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sensitivity.regular, Sensitivities::regular());
        assert_eq!(loaded.sensitivity.animated, Sensitivities::animated());
    }

    #[test]
    fn test_looser_animated_profile_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[sensitivity.animated]
percept = 9
average = -1
diff = 1
wavelet = -1
cnn = 0.97
"#,
        )
        .unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("percept"));
    }
}
