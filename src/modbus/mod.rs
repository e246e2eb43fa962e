pub mod buffer;
pub mod client;
pub mod codec;
pub mod crc;
pub mod protocol;
pub mod rtu;
pub mod tcp;
pub mod transport;

pub use buffer::FrameBuffer;
pub use client::ModbusMaster;
pub use crc::{crc16_check, crc16_modbus};
pub use protocol::{pack_coils, unpack_coils, Exchange, ExceptionCode, FunctionCode};
pub use rtu::{RtuTransport, SerialLink};
pub use tcp::{MbapHeader, TcpTransport};
pub use transport::{ModbusTransport, Timing, Transport, TransportKind};
