//! ModBus Master Communication Library
//!
//! This library talks to ModBus slaves over a serial line (RTU, CRC16 framed)
//! or over TCP (MBAP framed, with transaction correlation and reconnect). Both
//! links sit behind one thread-safe master with an optional keep-alive poller.

pub mod config;
pub mod modbus;
pub mod output;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use modbus::{Exchange, ExceptionCode, FunctionCode, ModbusMaster, TransportKind};
pub use output::{ConsoleFormatter, ExchangeFormatter, HexFormatter, JsonFormatter};
pub use utils::error::{ModbusError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matches_package() {
        assert_eq!(VERSION, "0.1.0");
    }
}
