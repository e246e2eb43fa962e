use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use crate::modbus::rtu::MAX_RTU_ADU;
use crate::modbus::tcp::MAX_TCP_ADU;
use crate::modbus::transport::Timing;
use crate::utils::error::{ModbusError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Link selection and settings
    pub transport: TransportConfig,

    // Frame buffer capacity in bytes (ADU, framing included)
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    // Background keep-alive poller
    #[serde(default)]
    pub keepalive: KeepAliveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Rtu(RtuConfig),
    Tcp(TcpConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtuConfig {
    pub serial_port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default)]
    pub flow_control: FlowControlConfig,
    #[serde(default = "default_slave_address")]
    pub slave_address: u8,
    #[serde(default = "TimingConfig::rtu_default")]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub ip: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    // Network interface to bind the socket to (Linux only), e.g. "enp1s0"
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "TimingConfig::tcp_default")]
    pub timing: TimingConfig,
}

/// Receive timing. Together these define where a reply frame ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    // Bounded wait for the first reply byte
    pub ready_timeout_ms: u64,
    // Sleep between empty polls while accumulating
    pub idle_delay_us: u64,
    // Consecutive empty polls after which the frame is considered complete
    pub idle_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    // Initial value of the stay-alive flag
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_keepalive_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowControlConfig {
    #[default]
    None,
    Hardware,
    Software,
}

fn default_max_frame_size() -> usize {
    1400
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_slave_address() -> u8 {
    1
}

fn default_tcp_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    200
}

fn default_keepalive_tick_ms() -> u64 {
    1000
}

impl TimingConfig {
    pub fn rtu_default() -> Self {
        Self {
            ready_timeout_ms: 3000,
            idle_delay_us: 200,
            idle_limit: 1000,
        }
    }

    pub fn tcp_default() -> Self {
        Self {
            ready_timeout_ms: 3000,
            idle_delay_us: 200,
            idle_limit: 100,
        }
    }

    pub fn to_timing(&self) -> Timing {
        Timing {
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            idle_delay: Duration::from_micros(self.idle_delay_us),
            idle_limit: self.idle_limit,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ready_timeout_ms == 0 {
            return Err(ModbusError::ConfigError(
                "timing.ready_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.idle_limit == 0 {
            return Err(ModbusError::ConfigError(
                "timing.idle_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_ms: default_keepalive_tick_ms(),
        }
    }
}

impl KeepAliveConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl RtuConfig {
    pub fn new(serial_port: &str, slave_address: u8) -> Self {
        Self {
            serial_port: serial_port.to_string(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: ParityConfig::None,
            flow_control: FlowControlConfig::None,
            slave_address,
            timing: TimingConfig::rtu_default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.serial_port.trim().is_empty() {
            return Err(ModbusError::ConfigError(
                "serial_port must not be empty".to_string(),
            ));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ModbusError::ConfigError(format!(
                "data_bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if self.stop_bits != 1 && self.stop_bits != 2 {
            return Err(ModbusError::ConfigError(format!(
                "stop_bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        self.timing.validate()
    }
}

impl TcpConfig {
    pub fn new(ip: &str, port: u16, unit_id: u8) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            interface: None,
            unit_id,
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            timing: TimingConfig::tcp_default(),
        }
    }

    pub fn ip_addr(&self) -> Result<IpAddr> {
        self.ip
            .trim()
            .parse()
            .map_err(|_| ModbusError::ConfigError(format!("invalid ip address '{}'", self.ip)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        self.ip_addr()?;
        if self.port == 0 {
            return Err(ModbusError::ConfigError("port must not be 0".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ModbusError::ConfigError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(interface) = &self.interface {
            if interface.trim().is_empty() {
                return Err(ModbusError::ConfigError(
                    "interface must not be empty when set".to_string(),
                ));
            }
        }
        self.timing.validate()
    }
}

impl Config {
    pub fn rtu(serial_port: &str, slave_address: u8) -> Self {
        Self {
            transport: TransportConfig::Rtu(RtuConfig::new(serial_port, slave_address)),
            max_frame_size: default_max_frame_size(),
            keepalive: KeepAliveConfig::default(),
        }
    }

    pub fn tcp(ip: &str, port: u16, unit_id: u8) -> Self {
        Self {
            transport: TransportConfig::Tcp(TcpConfig::new(ip, port, unit_id)),
            max_frame_size: default_max_frame_size(),
            keepalive: KeepAliveConfig::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("📄 Loading Modbus configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let min_frame_size = match self.transport {
            TransportConfig::Rtu(_) => MAX_RTU_ADU,
            TransportConfig::Tcp(_) => MAX_TCP_ADU,
        };
        if self.max_frame_size < min_frame_size || self.max_frame_size > u16::MAX as usize {
            return Err(ModbusError::ConfigError(format!(
                "max_frame_size must be {}-{} to hold any reply, got {}",
                min_frame_size,
                u16::MAX,
                self.max_frame_size
            )));
        }
        if self.keepalive.tick_ms == 0 {
            return Err(ModbusError::ConfigError(
                "keepalive.tick_ms must be greater than 0".to_string(),
            ));
        }

        match &self.transport {
            TransportConfig::Rtu(rtu) => {
                if !crate::modbus::rtu::SUPPORTED_BAUD_RATES.contains(&rtu.baud_rate) {
                    warn!(
                        "⚠️ Unsupported baud rate {}, the link will fall back to 9600",
                        rtu.baud_rate
                    );
                }
                rtu.validate()
            }
            TransportConfig::Tcp(tcp) => tcp.validate(),
        }
    }

    pub fn is_tcp(&self) -> bool {
        matches!(self.transport, TransportConfig::Tcp(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tcp_config_from_toml() {
        let config = Config::from_toml_str(
            r#"
            max_frame_size = 512

            [transport]
            type = "tcp"
            ip = "192.168.1.12"
            interface = "enp1s0"

            [keepalive]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.max_frame_size, 512);
        assert!(config.keepalive.enabled);
        assert_eq!(config.keepalive.tick_ms, 1000);
        match config.transport {
            TransportConfig::Tcp(tcp) => {
                assert_eq!(tcp.port, 502);
                assert_eq!(tcp.unit_id, 1);
                assert_eq!(tcp.interface.as_deref(), Some("enp1s0"));
                assert_eq!(tcp.timing, TimingConfig::tcp_default());
            }
            other => panic!("expected tcp transport, got {:?}", other),
        }
    }

    #[test]
    fn test_rtu_config_from_toml() {
        let config = Config::from_toml_str(
            r#"
            [transport]
            type = "rtu"
            serial_port = "/dev/ttyUSB0"
            baud_rate = 19200
            parity = "Even"
            flow_control = "Hardware"
            slave_address = 7

            [transport.timing]
            ready_timeout_ms = 500
            idle_delay_us = 100
            idle_limit = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.max_frame_size, 1400);
        assert!(!config.keepalive.enabled);
        match config.transport {
            TransportConfig::Rtu(rtu) => {
                assert_eq!(rtu.baud_rate, 19200);
                assert_eq!(rtu.data_bits, 8);
                assert_eq!(rtu.parity, ParityConfig::Even);
                assert_eq!(rtu.flow_control, FlowControlConfig::Hardware);
                assert_eq!(rtu.slave_address, 7);
                let timing = rtu.timing.to_timing();
                assert_eq!(timing.ready_timeout, Duration::from_millis(500));
                assert_eq!(timing.idle_delay, Duration::from_micros(100));
                assert_eq!(timing.idle_limit, 50);
            }
            other => panic!("expected rtu transport, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::rtu("/dev/ttyS0", 1);
        if let TransportConfig::Rtu(rtu) = &mut config.transport {
            rtu.data_bits = 9;
        }
        assert!(matches!(config.validate(), Err(ModbusError::ConfigError(_))));

        let mut config = Config::rtu("/dev/ttyS0", 1);
        if let TransportConfig::Rtu(rtu) = &mut config.transport {
            rtu.stop_bits = 3;
        }
        assert!(config.validate().is_err());

        let config = Config::tcp("not-an-ip", 502, 1);
        assert!(matches!(config.validate(), Err(ModbusError::ConfigError(_))));

        let mut config = Config::tcp("127.0.0.1", 502, 1);
        config.max_frame_size = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_size_must_hold_largest_reply() {
        let mut config = Config::tcp("127.0.0.1", 502, 1);
        config.max_frame_size = 64;
        assert!(matches!(config.validate(), Err(ModbusError::ConfigError(_))));
        config.max_frame_size = 259;
        assert!(config.validate().is_err());
        config.max_frame_size = 260;
        assert!(config.validate().is_ok());

        let mut config = Config::rtu("/dev/ttyS0", 1);
        config.max_frame_size = 255;
        assert!(config.validate().is_err());
        config.max_frame_size = 256;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_baud_rate_is_not_fatal() {
        let mut config = Config::rtu("/dev/ttyS0", 1);
        if let TransportConfig::Rtu(rtu) = &mut config.transport {
            rtu.baud_rate = 12345;
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[transport]\ntype = \"tcp\"\nip = \"10.0.0.5\"\nport = 1502\nunit_id = 3"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.is_tcp());
        if let TransportConfig::Tcp(tcp) = config.transport {
            assert_eq!(tcp.port, 1502);
            assert_eq!(tcp.unit_id, 3);
            assert_eq!(tcp.ip_addr().unwrap().to_string(), "10.0.0.5");
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = Config::from_file("/nonexistent/modbus.toml");
        assert!(matches!(result, Err(ModbusError::ConfigError(_))));
    }
}
