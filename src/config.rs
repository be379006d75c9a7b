//! Configuration for vtgrid.
//!
//! Loaded from `~/.vtgrid/config.toml`. Every key is optional:
//!
//! ```toml
//! # Shell to run (defaults to $SHELL, then /bin/sh)
//! shell = "/bin/bash"
//! args = ["--login"]
//!
//! queue_capacity = 256
//! read_buffer_size = 4096
//! log_level = "info"
//! forward_signals = true
//! follow_window_size = true
//!
//! # Initial pty size when no window size is known
//! [pty]
//! rows = 24
//! cols = 80
//!
//! # Window and cell size in pixels
//! [window]
//! width = 1024
//! height = 768
//!
//! [cell]
//! width = 10
//! height = 20
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::session::SessionOptions;
use crate::core::term::parser::ParserOptions;
use crate::core::terminal::TerminalOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine home directory")]
    NoHome,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command
    pub shell: Option<String>,
    /// Arguments passed to the shell
    pub args: Vec<String>,
    /// Events buffered between the parser and the grid
    pub queue_capacity: usize,
    /// Bytes read from the pty per call
    pub read_buffer_size: usize,
    pub log_level: String,
    /// Relay SIGHUP/SIGINT/SIGTERM to the shell
    pub forward_signals: bool,
    /// Resize the pty when our terminal is resized
    pub follow_window_size: bool,
    pub pty: PtyConfig,
    pub window: WindowConfig,
    pub cell: CellConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            queue_capacity: 256,
            read_buffer_size: 4096,
            log_level: "info".to_string(),
            forward_signals: true,
            follow_window_size: true,
            pty: PtyConfig::default(),
            window: WindowConfig::default(),
            cell: CellConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Window size in pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}

/// Cell size in pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self { width: 10, height: 20 }
    }
}

impl Config {
    /// Load `~/.vtgrid/config.toml`, falling back to defaults when it is
    /// missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    /// Load a config file, reporting any error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the config to `~/.vtgrid/config.toml`.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, content).map_err(write_err)
    }

    /// `~/.vtgrid`, home of the config and log files.
    pub fn data_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".vtgrid"))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.toml"))
    }

    /// The configured shell, then `$SHELL`, then `/bin/sh`.
    pub fn shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            rows: self.pty.rows,
            cols: self.pty.cols,
            forward_signals: self.forward_signals,
            follow_window_size: self.follow_window_size,
            ..SessionOptions::default()
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            queue_capacity: self.queue_capacity,
            read_buffer_size: self.read_buffer_size,
        }
    }

    pub fn terminal_options(&self) -> TerminalOptions {
        TerminalOptions {
            session: self.session_options(),
            parser: self.parser_options(),
            window_width: self.window.width,
            window_height: self.window.height,
            cell_width: self.cell.width,
            cell_height: self.cell.height,
        }
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!((config.pty.rows, config.pty.cols), (24, 80));
        assert_eq!((config.window.width, config.window.height), (1024, 768));
        assert_eq!((config.cell.width, config.cell.height), (10, 20));
        assert!(config.forward_signals);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "shell = \"/bin/bash\"\n[cell]\nwidth = 8\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.shell(), "/bin/bash");
        assert_eq!(config.cell.width, 8);
        assert_eq!(config.cell.height, 20);
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            args: vec!["-l".to_string()],
            log_level: "debug".to_string(),
            follow_window_size: false,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "queue_capacity = \"lots\"").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = TempDir::new().unwrap();
        let result = Config::load_from(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_terminal_options_follow_config() {
        let mut config = Config::default();
        config.queue_capacity = 16;
        config.forward_signals = false;
        let options = config.terminal_options();
        assert_eq!(options.parser.queue_capacity, 16);
        assert!(!options.session.forward_signals);
        assert_eq!(options.cell_height, 20);
    }
}
