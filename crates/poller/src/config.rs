//! Poller configuration management

use crate::usb::worker::{DEFAULT_PAYLOAD, DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};
use crate::usb::{ClaimOptions, PollOptions};
use anyhow::{Context, Result, anyhow};
use common::DeviceSelector;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which device to drive and how to claim it
///
/// # Example Configuration
/// ```toml
/// [device]
/// vendor_id = 0x0483
/// product_id = 0x5711
/// interface = 0
/// reattach_kernel_driver = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Interface number to claim
    #[serde(default)]
    pub interface: u8,
    /// Alternate setting whose endpoints are used
    #[serde(default)]
    pub alt_setting: u8,
    /// Give the interface back to its kernel driver on exit, if one was detached
    #[serde(default = "DeviceSettings::default_reattach")]
    pub reattach_kernel_driver: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            interface: 0,
            alt_setting: 0,
            reattach_kernel_driver: Self::default_reattach(),
        }
    }
}

impl DeviceSettings {
    fn default_reattach() -> bool {
        true
    }

    pub fn selector(&self) -> DeviceSelector {
        DeviceSelector::new(self.vendor_id, self.product_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Sleep before each read/write cycle
    #[serde(default = "PollSettings::default_interval_ms")]
    pub interval_ms: u64,
    /// Per-transfer timeout, at least 1 ms
    #[serde(default = "PollSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Bytes written to the OUT endpoint every cycle
    #[serde(default = "PollSettings::default_payload")]
    pub payload: Vec<u8>,
    /// Stop after this many cycles (absent = run until interrupted)
    #[serde(default)]
    pub max_iterations: Option<u64>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval_ms(),
            timeout_ms: Self::default_timeout_ms(),
            payload: Self::default_payload(),
            max_iterations: None,
        }
    }
}

impl PollSettings {
    fn default_interval_ms() -> u64 {
        1000
    }

    fn default_timeout_ms() -> u64 {
        1000
    }

    fn default_payload() -> Vec<u8> {
        DEFAULT_PAYLOAD.to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "debug".to_string()
    }
}

impl PollerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            Self::search_paths()
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: PollerConfig =
            toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load the first configuration file in the standard locations, or
    /// return defaults if there is none
    pub fn load_or_default() -> Result<Self> {
        Self::load_first_or_default(&Self::search_paths())
    }

    /// Load the first of `candidates` that exists, or defaults if none does
    ///
    /// A file that exists but cannot be read or parsed is an error rather
    /// than a silent fallback to the default device.
    pub fn load_first_or_default(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load(Some(path.clone())),
            None => Ok(Self::default()),
        }
    }

    /// Standard configuration locations, in lookup order
    pub fn search_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/usb-poller/poller.toml"),
        ]
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-poller").join("poller.toml")
        } else {
            PathBuf::from(".config/usb-poller/poller.toml")
        }
    }

    /// Options for the poll worker
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            selector: self.device.selector(),
            claim: ClaimOptions {
                interface: self.device.interface,
                alt_setting: self.device.alt_setting,
                reattach_kernel_driver: self.device.reattach_kernel_driver,
            },
            interval: Duration::from_millis(self.poll.interval_ms),
            timeout: Duration::from_millis(self.poll.timeout_ms),
            payload: self.poll.payload.clone(),
            max_iterations: self.poll.max_iterations,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.poll.payload.is_empty() {
            return Err(anyhow!("Poll payload must contain at least one byte"));
        }

        if self.poll.timeout_ms == 0 {
            return Err(anyhow!(
                "timeout_ms must be at least 1 (an unlimited wait would block shutdown)"
            ));
        }

        if self.poll.max_iterations == Some(0) {
            return Err(anyhow!(
                "max_iterations must be at least 1 (omit it to poll forever)"
            ));
        }

        Ok(())
    }
}

/// Load configuration from a user-supplied path, expanding `~`
pub fn load_config(path: &str) -> Result<PollerConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    PollerConfig::load(Some(path_buf))
}
