//! acqsrv configuration
//!
//! Sources, lowest priority first: built-in defaults, the YAML file, then
//! `ACQSRV_` environment variables with `__` separating nested keys
//! (`ACQSRV_DEVICE__HOST=10.0.0.7`).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use fieldlink_modbus::constants::MAX_READ_REGISTERS;
use fieldlink_modbus::{DeviceEndpoint, RegisterOrder};
use serde::{Deserialize, Serialize};

use crate::error::{AcqError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config/acqsrv.yaml";
pub const ENV_PREFIX: &str = "ACQSRV_";

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub device: DeviceConfig,
    pub decode: RegisterOrder,
    pub polling: PollingConfig,
    pub blocks: Vec<RegisterBlock>,
    pub reset: ResetConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            device: DeviceConfig::default(),
            decode: RegisterOrder::default(),
            polling: PollingConfig::default(),
            blocks: default_blocks(),
            reset: ResetConfig::default(),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub enable_api: bool,
    pub api_host: String,
    pub api_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "acqsrv".to_string(),
            enable_api: true,
            api_host: "0.0.0.0".to_string(),
            api_port: 8086,
        }
    }
}

/// Field device connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            connect_timeout_ms: 1000,
            request_timeout_ms: 1000,
        }
    }
}

impl DeviceConfig {
    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint::new(self.host.clone(), self.port, self.unit_id)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// One contiguous holding-register range read per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterBlock {
    pub name: String,
    pub start: u16,
    pub count: u16,
    /// Alternate start tried when the primary read fails or returns all zeros
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_start: Option<u16>,
    /// A failed required block aborts the cycle; an optional one is skipped
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

fn default_blocks() -> Vec<RegisterBlock> {
    vec![
        RegisterBlock {
            name: "block1".to_string(),
            start: 125,
            count: 4,
            fallback_start: None,
            required: true,
        },
        RegisterBlock {
            name: "block2".to_string(),
            start: 428,
            count: 10,
            fallback_start: Some(427),
            required: false,
        },
    ]
}

/// Write-verify reset command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Target name -> register address
    pub targets: BTreeMap<String, u16>,
    pub value: u16,
    /// Connect and per-request timeout for write-verify
    pub timeout_ms: u64,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            targets: BTreeMap::from([("pcs".to_string(), 125), ("set".to_string(), 127)]),
            value: 0,
            timeout_ms: 2000,
        }
    }
}

impl ResetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Layered figment for `path`
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Verify configuration integrity
    pub fn validate(&self) -> Result<()> {
        if self.service.name.is_empty() {
            return Err(AcqError::invalid_config("service.name", "cannot be empty"));
        }
        if self.service.enable_api && self.service.api_port == 0 {
            return Err(AcqError::invalid_config("service.api_port", "must be non-zero"));
        }
        if self.device.host.is_empty() {
            return Err(AcqError::invalid_config("device.host", "cannot be empty"));
        }
        if self.device.port == 0 {
            return Err(AcqError::invalid_config("device.port", "must be non-zero"));
        }
        if self.polling.interval_ms == 0 {
            return Err(AcqError::invalid_config(
                "polling.interval_ms",
                "must be non-zero",
            ));
        }

        let Some(first) = self.blocks.first() else {
            return Err(AcqError::invalid_config(
                "blocks",
                "at least one block must be configured",
            ));
        };
        if !first.required || first.count < 4 {
            return Err(AcqError::invalid_config(
                "blocks[0]",
                "first block must be required and span at least 4 registers",
            ));
        }

        for (index, block) in self.blocks.iter().enumerate() {
            let field = format!("blocks[{index}]");
            if block.count == 0 || block.count > MAX_READ_REGISTERS {
                return Err(AcqError::invalid_config(
                    field,
                    format!("count {} outside 1..={}", block.count, MAX_READ_REGISTERS),
                ));
            }
            if block.required && block.count % 2 != 0 {
                return Err(AcqError::invalid_config(
                    field,
                    "required block count must be even",
                ));
            }
            for start in std::iter::once(block.start).chain(block.fallback_start) {
                if u32::from(start) + u32::from(block.count) > 0x1_0000 {
                    return Err(AcqError::invalid_config(
                        field,
                        format!("range {}+{} exceeds address space", start, block.count),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| AcqError::Configuration(e.to_string()))
    }
}
