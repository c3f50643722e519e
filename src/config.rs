//! Configuration for rawcon.
//!
//! Settings are read once at startup and passed explicitly to
//! [`Terminal::open`](crate::input::Terminal::open) and
//! [`console_writer`](crate::output::console_writer).
//!
//! # Configuration File
//!
//! The configuration file is located at `~/.rawcon/config.toml`:
//!
//! ```toml
//! # Input driver: AUTO, UNIX, MACOS, WINDOWS or NONE
//! terminal_type = "AUTO"
//!
//! # Interpret ANSI escape sequences on output
//! enable_ansi = true
//! # Write escape sequences even when output is not a terminal
//! force_enable_ansi = false
//!
//! enable_echo = true
//! enable_interrupt = false
//! enable_backspace = true
//! ```
//!
//! The `RAWCON_TERMINAL` environment variable overrides `terminal_type`.

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::input::TerminalType;

/// Environment variable that overrides `terminal_type`
pub const TERMINAL_TYPE_ENV: &str = "RAWCON_TERMINAL";

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input driver selection
    pub terminal_type: TerminalType,
    /// Interpret ANSI escape sequences on output
    pub enable_ansi: bool,
    /// Pass escape sequences through untouched even when not a terminal
    pub force_enable_ansi: bool,
    /// Echo typed characters
    pub enable_echo: bool,
    /// Let Ctrl-C interrupt the process
    pub enable_interrupt: bool,
    /// Treat backspace/DEL as line editing
    pub enable_backspace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            terminal_type: TerminalType::Auto,
            enable_ansi: true,
            force_enable_ansi: false,
            enable_echo: true,
            enable_interrupt: false,
            enable_backspace: true,
        }
    }
}

impl Config {
    /// Load configuration from file, then apply the environment override
    pub fn load() -> Self {
        let mut config = Self::load_file();
        config.apply_env(|key| env::var(key).ok());
        config
    }

    fn load_file() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(content) => match Self::from_toml(&content) {
                        Ok(config) => return config,
                        Err(e) => tracing::warn!("Ignoring invalid {}: {}", path.display(), e),
                    },
                    Err(e) => tracing::warn!("Failed to read {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    /// Parse a configuration document; missing keys take their defaults
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Replace `terminal_type` from the environment when set to a known value
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(value) = lookup(TERMINAL_TYPE_ENV) else {
            return;
        };
        match value.parse() {
            Ok(kind) => self.terminal_type = kind,
            Err(e) => tracing::warn!("Ignoring {}={:?}: {}", TERMINAL_TYPE_ENV, value, e),
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), String> {
        if let Some(path) = Self::get_config_path() {
            let content = toml::to_string_pretty(self)
                .map_err(|e| format!("Failed to serialize config: {}", e))?;
            fs::write(&path, content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
            Ok(())
        } else {
            Err("Could not determine config path".to_string())
        }
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        let dir = config_dir()?;
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir.join("config.toml"))
    }
}

/// `~/.rawcon`, also used for the log file
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".rawcon"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    env::var_os("USERPROFILE")
        .or_else(|| env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_missing_keys() {
        let config = Config::from_toml("enable_echo = false\n").unwrap();
        assert!(!config.enable_echo);
        assert!(config.enable_ansi);
        assert!(config.enable_backspace);
        assert!(!config.enable_interrupt);
        assert_eq!(config.terminal_type, TerminalType::Auto);
    }

    #[test]
    fn test_terminal_type_names() {
        let config = Config::from_toml("terminal_type = \"MACOS\"\n").unwrap();
        assert_eq!(config.terminal_type, TerminalType::MacOs);

        assert!(Config::from_toml("terminal_type = \"BEOS\"\n").is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = Config {
            terminal_type: TerminalType::None,
            force_enable_ansi: true,
            ..Config::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::default();
        config.apply_env(|key| (key == TERMINAL_TYPE_ENV).then(|| "windows".to_string()));
        assert_eq!(config.terminal_type, TerminalType::Windows);

        config.apply_env(|_| Some("nonsense".to_string()));
        assert_eq!(config.terminal_type, TerminalType::Windows);

        config.apply_env(|_| None);
        assert_eq!(config.terminal_type, TerminalType::Windows);
    }
}
