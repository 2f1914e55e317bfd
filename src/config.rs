// ABOUTME: Application configuration loaded from a TOML file in the user's config directory
// Timing constants for streams and reconnects are fixed in code, not configured here

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub docker: DockerConfig,
    pub machines: MachineConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// `unix://` socket of the daemon; auto-detected when unset
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Shell command launched in every dev machine once it is running
    pub startup_command: String,
    /// Container label whose value `true` marks a dev machine
    pub dev_label: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            startup_command: "~/start-ext-server.sh".to_string(),
            dev_label: "machine.dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// WebSocket URL of the machine event endpoint
    pub endpoint: Option<String>,
}

impl AppConfig {
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("dev", "machine-box", "machine-box")
    }

    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Directory for log files
    pub fn log_dir() -> PathBuf {
        Self::project_dirs()
            .map(|dirs| dirs.data_local_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from(".machine-box/logs"))
    }

    /// Load from the default location, falling back to defaults when no file exists
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file at {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing TOML config from {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[docker]
host = "unix:///run/user/1000/docker.sock"

[events]
endpoint = "ws://localhost:8080/api/ws"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.docker.host.as_deref(), Some("unix:///run/user/1000/docker.sock"));
        assert_eq!(config.events.endpoint.as_deref(), Some("ws://localhost:8080/api/ws"));
        assert_eq!(config.machines, MachineConfig::default());
    }

    #[test]
    fn test_machine_section_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[machines]
startup_command = "/opt/tools/agent start"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.machines.startup_command, "/opt/tools/agent start");
        assert_eq!(config.machines.dev_label, "machine.dev");
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[docker\nhost = 1").unwrap();

        let err = AppConfig::load_from_path(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing TOML config"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(AppConfig::load_from_path(dir.path().join("absent.toml")).is_err());
    }
}
