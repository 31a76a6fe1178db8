//! Monitor configuration management

use anyhow::{Context, Result, anyhow};
use protocol::{DEFAULT_BAUD_RATE, DeviceFilter, FilterSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Print complete lines instead of a hex dump of every byte
    #[serde(default)]
    pub line_mode: bool,
    /// Data-event threshold passed to the session
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Reuse an authorized device without looking at the filters
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Extra acceptance patterns, "vid:pid" or "vid:*" in hex
    #[serde(default)]
    pub filters: Vec<String>,
    /// Devices treated as already authorized, same pattern format
    #[serde(default)]
    pub authorized: Vec<String>,
    /// Start from the built-in board table
    #[serde(default = "default_true")]
    pub use_default_filters: bool,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_buffer_size() -> usize {
    serial::DEFAULT_BUFFER_SIZE
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            line_mode: false,
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            auto_connect: true,
        }
    }
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            authorized: Vec::new(),
            use_default_filters: true,
        }
    }
}

fn parse_patterns(patterns: &[String]) -> Result<Vec<DeviceFilter>> {
    patterns
        .iter()
        .map(|p| p.parse::<DeviceFilter>().map_err(|e| anyhow!(e)))
        .collect()
}

impl MonitorConfig {
    /// Load configuration from the specified path, or the default location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => expand_path(&p),
            None => {
                let p = Self::default_path();
                if !p.exists() {
                    return Err(anyhow!("No configuration file found, using defaults"));
                }
                p
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: MonitorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::debug!(
            "Config: {} extra filters, {} authorized patterns",
            config.usb.filters.len(),
            config.usb.authorized.len()
        );
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                // Logging is not initialized yet
                eprintln!("Config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("webusb-serial").join("monitor.toml")
        } else {
            PathBuf::from(".config/webusb-serial/monitor.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.monitor.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.monitor.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(anyhow!("Baud rate must be greater than zero"));
        }

        parse_patterns(&self.usb.filters).context("Invalid entry in usb.filters")?;
        parse_patterns(&self.usb.authorized).context("Invalid entry in usb.authorized")?;

        if !self.usb.use_default_filters && self.usb.filters.is_empty() {
            return Err(anyhow!(
                "usb.filters is empty and use_default_filters is off, no device could match"
            ));
        }

        Ok(())
    }

    /// Acceptance filters for device selection
    pub fn filter_set(&self) -> Result<FilterSet> {
        let base = if self.usb.use_default_filters {
            FilterSet::default()
        } else {
            FilterSet::new(Vec::new())
        };
        Ok(base.with_extra(parse_patterns(&self.usb.filters)?))
    }

    /// Allow-list of devices that count as already authorized
    pub fn authorized_set(&self) -> Result<FilterSet> {
        Ok(FilterSet::new(parse_patterns(&self.usb.authorized)?))
    }
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}
