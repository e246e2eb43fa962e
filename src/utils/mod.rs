pub mod error;
pub mod logging;

pub use error::{ModbusError, Result};
pub use logging::{frame_hex, init_logging};
