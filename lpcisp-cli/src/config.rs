//! Configuration file support for lpcisp.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (LPCISP_*)
//! 3. Local config file (./lpcisp.toml)
//! 4. Global config file (~/.config/lpcisp/config.toml)
//!
//! The first two layers are handled by clap; this module merges the files.
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//! control = true
//! xonxoff = false
//!
//! [target]
//! cpu = "lpc1768"
//! osc_freq = 12000
//! ```

use anyhow::Context;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "lpcisp.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Drive DTR/RTS to enter the bootloader.
    pub control: Option<bool>,
    /// XON/XOFF software flow control.
    pub xonxoff: Option<bool>,
}

/// Target configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetConfig {
    /// Chip name or "autodetect".
    pub cpu: Option<String>,
    /// Crystal frequency in kHz.
    pub osc_freq: Option<u32>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Target settings.
    #[serde(default)]
    pub target: TargetConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike the implicit files, an explicit path must exist and parse.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lpcisp").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set fields of `other` win.
    fn merge(&mut self, other: Self) {
        let Self { connection, target } = other;

        if connection.port.is_some() {
            self.connection.port = connection.port;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }
        if connection.control.is_some() {
            self.connection.control = connection.control;
        }
        if connection.xonxoff.is_some() {
            self.connection.xonxoff = connection.xonxoff;
        }

        if target.cpu.is_some() {
            self.target.cpu = target.cpu;
        }
        if target.osc_freq.is_some() {
            self.target.osc_freq = target.osc_freq;
        }
    }
}
