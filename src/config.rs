//! Session configuration: defaults, TOML file layer, derived paths

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8765;
pub const SEND_ARCHIVE_NAME: &str = "SendFile.zip";
pub const RECEIVE_ARCHIVE_NAME: &str = "ReceiveFile.zip";

/// Platform config directory (APPDATA on Windows, ~/.config/ferry elsewhere)
pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("Ferry");
        }
    }
    if let Some(home) = home_dir() {
        return home.join(".config").join("ferry");
    }
    PathBuf::from(".ferry")
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        if let Ok(profile) = std::env::var("USERPROFILE") {
            return Some(PathBuf::from(profile));
        }
    }
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub port: u16,
    /// Seconds between discovery scans while no peer answers
    pub poll_interval_secs: f64,
    pub probe_timeout_ms: u64,
    /// Admission gate size for concurrent probes
    pub max_in_flight: usize,
    /// Serving root and reconciliation target; None = home directory
    pub documents_root: Option<PathBuf>,
    pub work_dir_name: String,
    /// Path component stripped (with everything before it) from archive names
    pub anchor: String,
    /// This host keeps a managed documents tree and identifies as a ferry peer
    pub managed_documents: bool,
    /// Compact counters instead of a bar while downloading
    pub compact_progress: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            poll_interval_secs: 1.0,
            probe_timeout_ms: 1000,
            max_in_flight: 100,
            documents_root: None,
            work_dir_name: "Transfer".to_string(),
            anchor: "Documents".to_string(),
            managed_documents: false,
            compact_progress: false,
            log_file: None,
        }
    }
}

impl SessionConfig {
    /// Load from an explicit path, or from the default location when present.
    /// A missing default file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_dir().join("config.toml"), false),
        };
        if !path.exists() {
            if required {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: SessionConfig = toml::from_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be non-zero");
        }
        if self.max_in_flight == 0 {
            anyhow::bail!("max_in_flight must be at least 1");
        }
        if self.probe_timeout_ms == 0 {
            anyhow::bail!("probe_timeout_ms must be non-zero");
        }
        if !(self.poll_interval_secs.is_finite() && self.poll_interval_secs >= 0.0) {
            anyhow::bail!("poll_interval_secs must be a non-negative number");
        }
        if self.work_dir_name.trim().is_empty() {
            anyhow::bail!("work_dir_name must not be empty");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn documents_root(&self) -> PathBuf {
        if let Some(root) = &self.documents_root {
            return root.clone();
        }
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        if self.managed_documents {
            home.join(&self.anchor)
        } else {
            home
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.documents_root().join(&self.work_dir_name)
    }

    pub fn send_path(&self) -> PathBuf {
        self.work_dir().join(SEND_ARCHIVE_NAME)
    }

    pub fn receive_path(&self) -> PathBuf {
        self.work_dir().join(RECEIVE_ARCHIVE_NAME)
    }

    /// `/`-separated location of the outgoing archive under the serving root
    pub fn archive_request_path(&self) -> String {
        let rel = self
            .send_path()
            .strip_prefix(self.documents_root())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(&self.work_dir_name).join(SEND_ARCHIVE_NAME));
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_and_documented() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.port, 8765);
        assert_eq!(cfg.max_in_flight, 100);
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.poll_interval(), Duration::from_secs(1));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn derived_paths_live_under_work_dir() {
        let cfg = SessionConfig {
            documents_root: Some(PathBuf::from("/srv/docs")),
            ..Default::default()
        };
        assert_eq!(cfg.send_path(), PathBuf::from("/srv/docs/Transfer/SendFile.zip"));
        assert_eq!(cfg.receive_path(), PathBuf::from("/srv/docs/Transfer/ReceiveFile.zip"));
        assert_eq!(cfg.archive_request_path(), "Transfer/SendFile.zip");
    }

    #[test]
    fn toml_layer_overrides_only_given_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "port = 9000\nmax_in_flight = 8\n").unwrap();
        let cfg = SessionConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.max_in_flight, 8);
        assert_eq!(cfg.anchor, "Documents");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(SessionConfig::load(Some(&tmp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let cfg = SessionConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
