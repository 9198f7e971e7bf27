use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use portal_core::{MonitorUrlTemplate, Sentinels};
use portal_engine::{PreviewSettings, DEFAULT_CHARSET};
use portal_logging::portal_info;
use serde::{Deserialize, Serialize};

use crate::persistence::{to_ron, write_atomic};

pub const CONFIG_FILENAME: &str = ".portal.ron";

/// Connection and behaviour settings for one dataset, stored as RON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Root of the portal's REST API, e.g. `http://localhost:9000/api`.
    pub base_url: String,
    pub repo_id: String,
    pub dataset_id: String,
    /// Dataset stage the file commands operate on.
    pub stage: String,
    /// Byte budget for previews; `None` always loads whole files.
    pub preview_max_bytes: Option<u64>,
    pub default_charset: String,
    pub monitor_url: MonitorUrlTemplate,
    pub sentinels: Sentinels,
    /// Where the page query string (and so any monitored job id) is kept.
    pub state_file: PathBuf,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/api".to_string(),
            repo_id: String::new(),
            dataset_id: String::new(),
            stage: "input".to_string(),
            preview_max_bytes: PreviewSettings::default().max_bytes,
            default_charset: DEFAULT_CHARSET.to_string(),
            monitor_url: MonitorUrlTemplate::new("ws://localhost:9000/admin/jobs/{jobId}"),
            sentinels: Sentinels::default(),
            state_file: PathBuf::from(".portal_state.ron"),
        }
    }
}

impl PortalConfig {
    /// Read the config at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                portal_info!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read config {path:?}"))
            }
        };
        let config: Self =
            ron::from_str(&content).with_context(|| format!("failed to parse config {path:?}"))?;
        portal_info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = to_ron(self)?;
        write_atomic(path, &content).with_context(|| format!("failed to write config {path:?}"))
    }

    pub fn preview_settings(&self) -> PreviewSettings {
        PreviewSettings {
            max_bytes: self.preview_max_bytes,
            default_charset: self.default_charset.clone(),
        }
    }

    /// The state file resolves against the config file's directory.
    pub fn state_path(&self, config_path: &Path) -> PathBuf {
        match config_path.parent() {
            Some(dir) if self.state_file.is_relative() => dir.join(&self.state_file),
            _ => self.state_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PortalConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config, PortalConfig::default());
        assert_eq!(config.preview_max_bytes, Some(1024 * 1024));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let mut config = PortalConfig::default();
        config.repo_id = "nl-001".to_string();
        config.dataset_id = "ead".to_string();
        config.preview_max_bytes = None;
        config.sentinels.done = "DONE".to_string();

        config.save(&path).unwrap();

        assert_eq!(PortalConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, r#"(repo_id: "r1", dataset_id: "d1")"#).unwrap();

        let config = PortalConfig::load(&path).unwrap();
        assert_eq!(config.repo_id, "r1");
        assert_eq!(config.stage, "input");
        assert_eq!(config.sentinels, Sentinels::default());
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "(repo_id: ").unwrap();

        let err = PortalConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn relative_state_file_sits_next_to_the_config() {
        let config = PortalConfig::default();
        assert_eq!(
            config.state_path(Path::new("/work/.portal.ron")),
            PathBuf::from("/work/.portal_state.ron")
        );
    }
}
