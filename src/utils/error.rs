use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModbusError>;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    ValidationError(String),

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("CRC checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumError { expected: u16, received: u16 },

    #[error("Frame truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Frame buffer overflow: needed {needed} bytes, {available} available")]
    BufferOverflow { needed: usize, available: usize },

    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ModbusError {
    /// Setup failures: the context could not be created and nothing is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModbusError::InitError(_) | ModbusError::ConfigError(_))
    }

    /// Failures of a single exchange; the caller may retry with a fresh one.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModbusError::Timeout
                | ModbusError::ProtocolError(_)
                | ModbusError::ChecksumError { .. }
                | ModbusError::Truncated { .. }
                | ModbusError::BufferOverflow { .. }
                | ModbusError::WriteError(_)
                | ModbusError::CommunicationError(_)
        )
    }

    /// The link itself is down, as opposed to one frame being lost.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ModbusError::ReconnectFailed { .. } | ModbusError::NotConnected
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ModbusError::Timeout,
            _ => ModbusError::CommunicationError(format!("IO error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML error: {}", err))
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        ModbusError::InitError(format!("Serial port error: {}", err))
    }
}
