//! Run configuration, read from a JSON file.
//!
//! ```json
//! {
//!   "devices": [
//!     { "name": "cam1", "address": "192.168.1.110", "application": 4 }
//!   ],
//!   "max_attempts": 3,
//!   "read_timeout_ms": 5000,
//!   "output_dir": "images"
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::fleet::DeviceTarget;
use crate::protocol::DEFAULT_PORT;
use crate::session::{DEFAULT_MAX_ATTEMPTS, SessionOptions};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Defaults to `address:port`.
    pub name: Option<String>,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub application: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub devices: Vec<DeviceConfig>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub read_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    /// Deadline for the whole run.
    pub run_timeout_ms: Option<u64>,
    /// Where image payloads are written, one file per device.
    pub output_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("no devices configured");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        for device in &self.devices {
            if device.application > 99 {
                bail!(
                    "device {}: application {} is not in 0..=99",
                    device.address,
                    device.application
                );
            }
        }
        Ok(())
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    /// One connection target per configured device, in file order.
    pub fn targets(&self) -> Vec<DeviceTarget> {
        self.devices
            .iter()
            .map(|device| {
                let address = format!("{}:{}", device.address, device.port);
                DeviceTarget {
                    name: device.name.clone().unwrap_or_else(|| address.clone()),
                    options: SessionOptions {
                        application: device.application,
                        max_attempts: self.max_attempts,
                        read_timeout: self.read_timeout_ms.map(Duration::from_millis),
                        connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
                    },
                    address,
                }
            })
            .collect()
    }
}
