//! Capture settings file (TOML)
//!
//! Every field is optional; command-line flags override whatever the file
//! provides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::image::BACKGROUND;
use crate::protocol::{DRAIN_LIMIT, DRAIN_WINDOW};

/// Baud rate used by the bridge sketch
pub const DEFAULT_BAUD: u32 = 57600;

/// Per-byte read timeout while receiving the payload
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Serial port path (e.g., /dev/ttyACM0, COM13)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Fill value for pixels the sensor plane does not cover
    pub background: u8,
    /// Trailing bytes read after the payload
    pub drain_limit: usize,
    /// Time allowed for reading the trailing bytes
    pub drain_window_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            background: BACKGROUND,
            drain_limit: DRAIN_LIMIT,
            drain_window_ms: DRAIN_WINDOW.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub serial: SerialSettings,
    pub capture: CaptureSettings,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;

        Self::parse(&content).with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            bail!("baud_rate must be positive");
        }
        if self.serial.timeout_ms == 0 {
            bail!("timeout_ms must be positive");
        }
        Ok(())
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, port: Option<String>, baud_rate: Option<u32>) -> Self {
        if port.is_some() {
            self.serial.port = port;
        }
        if let Some(baud) = baud_rate {
            self.serial.baud_rate = baud;
        }
        self
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.timeout_ms)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.capture.drain_window_ms)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }
}
