use crate::prelude::*;

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub controller: Controller,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Controller {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Controller {
    pub host: String,
    #[serde(default = "Config::default_port")]
    pub port: u16,

    pub unit_id: Option<u8>,
    pub timeout: Option<u64>,
    pub scan_interval: Option<u64>,

    #[serde(default)]
    pub ignore_zero_counter_values: bool,
    #[serde(default)]
    pub enable_wireless: bool,
    pub wireless_sensors: Option<u8>,
    pub leak_lines: Option<u8>,

    pub use_tcp_nodelay: Option<bool>,
    pub read_only: Option<bool>,
}

impl Controller {
    /// Minimal controller config with every optional knob at its default.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            unit_id: None,
            timeout: None,
            scan_interval: None,
            ignore_zero_counter_values: false,
            enable_wireless: false,
            wireless_sensors: None,
            leak_lines: None,
            use_tcp_nodelay: None,
            read_only: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id.unwrap_or(240) // factory default Modbus address
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(5))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval.unwrap_or(30))
    }

    pub fn ignore_zero_counter_values(&self) -> bool {
        self.ignore_zero_counter_values
    }

    pub fn enable_wireless(&self) -> bool {
        self.enable_wireless
    }

    pub fn wireless_sensors(&self) -> u8 {
        self.wireless_sensors.unwrap_or(1)
    }

    pub fn leak_lines(&self) -> u8 {
        self.leak_lines.unwrap_or(4)
    }

    pub fn use_tcp_nodelay(&self) -> bool {
        self.use_tcp_nodelay.unwrap_or(true)
    }

    pub fn read_only(&self) -> bool {
        self.read_only == Some(true)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Empty("controller.host"));
        }
        check_range("controller.port", self.port as u64, 1, 65535)?;
        check_range("controller.unit_id", self.unit_id() as u64, 1, 247)?;
        check_range("controller.timeout", self.timeout().as_secs(), 1, 60)?;
        check_range("controller.scan_interval", self.scan_interval().as_secs(), 5, 3600)?;
        check_range("controller.wireless_sensors", self.wireless_sensors() as u64, 1, 5)?;
        check_range("controller.leak_lines", self.leak_lines() as u64, 1, 4)?;

        Ok(())
    }
} // }}}

pub(crate) fn check_range(
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }

    Ok(())
}

#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.config.controller
    }

    pub fn loglevel(&self) -> &str {
        &self.config.loglevel
    }

    pub fn log_summary(&self) {
        self.config.log_summary()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content).map_err(|err| anyhow!("error parsing {}: {}", file, err))
    }

    pub fn log_summary(&self) {
        let c = &self.controller;
        info!("Configuration loaded successfully:");
        info!("  Controller: {}:{} (unit {})", c.host(), c.port(), c.unit_id());
        info!("    Timeout: {}s", c.timeout().as_secs());
        info!("    Scan Interval: {}s", c.scan_interval().as_secs());
        info!("    Ignore Zero Counter Values: {}", c.ignore_zero_counter_values());
        info!(
            "    Wireless: {}",
            if c.enable_wireless() {
                format!("enabled, {} sensors", c.wireless_sensors())
            } else {
                "disabled".to_string()
            }
        );
        info!("    Leak Lines: {}", c.leak_lines());
        info!("    TCP NoDelay: {}", c.use_tcp_nodelay());
        info!("    Read Only: {}", c.read_only());
        info!("  Log Level: {}", self.loglevel);
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_controller(controller: Controller) -> Result<Self> {
        let config = Self {
            controller,
            loglevel: Self::default_loglevel(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()
    }

    fn default_port() -> u16 {
        502
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
