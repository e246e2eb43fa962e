use log::{debug, error, info, warn};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::buffer::FrameBuffer;
use super::codec;
use super::crc::crc16_modbus;
use super::protocol::Exchange;
use super::transport::{accumulate, wait_ready, ModbusTransport, ReadOutcome, Timing};
use crate::config::settings::{FlowControlConfig, ParityConfig, RtuConfig};
use crate::utils::error::{ModbusError, Result};
use crate::utils::logging::frame_hex;

pub const SUPPORTED_BAUD_RATES: [u32; 18] = [
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 921600,
];

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Largest RTU frame: address, 253-byte PDU, CRC.
pub const MAX_RTU_ADU: usize = 256;

// slave address + function code + CRC
const MIN_RTU_FRAME: usize = 4;

/// Maps a requested rate onto the supported table, falling back to 9600.
pub fn map_baud_rate(baud_rate: u32) -> u32 {
    if SUPPORTED_BAUD_RATES.contains(&baud_rate) {
        baud_rate
    } else {
        warn!(
            "⚠️ Baud rate {} not supported, using {}",
            baud_rate, DEFAULT_BAUD_RATE
        );
        DEFAULT_BAUD_RATE
    }
}

fn map_data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(ModbusError::InitError(format!("invalid data bits {}", other))),
    }
}

fn map_stop_bits(bits: u8) -> Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(ModbusError::InitError(format!("invalid stop bits {}", other))),
    }
}

fn map_parity(parity: ParityConfig) -> Parity {
    match parity {
        ParityConfig::None => Parity::None,
        ParityConfig::Odd => Parity::Odd,
        ParityConfig::Even => Parity::Even,
    }
}

fn map_flow_control(flow: FlowControlConfig) -> FlowControl {
    match flow {
        FlowControlConfig::None => FlowControl::None,
        FlowControlConfig::Hardware => FlowControl::Hardware,
        FlowControlConfig::Software => FlowControl::Software,
    }
}

/// Byte-level access to a serial line.
pub trait SerialLink: Send {
    fn bytes_available(&mut self) -> Result<usize>;

    /// Reads whatever is pending without blocking; 0 when nothing is.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    fn discard_input(&mut self) -> Result<()>;
}

impl SerialLink for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pending = self.bytes_to_read()? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let len = pending.min(buf.len());
        match self.read(&mut buf[..len]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.write_all(frame)
            .map_err(|e| ModbusError::WriteError(format!("serial write failed: {}", e)))?;
        self.flush()
            .map_err(|e| ModbusError::WriteError(format!("serial flush failed: {}", e)))
    }

    fn discard_input(&mut self) -> Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

pub struct RtuTransport {
    link: Option<Box<dyn SerialLink>>,
    port_name: String,
    buffer: FrameBuffer,
    timing: Timing,
    slave_address: u8,
    last_rx_address: Option<u8>,
    last_tx_crc: u16,
    last_rx_crc: u16,
}

impl RtuTransport {
    pub fn open(config: &RtuConfig, frame_size: usize) -> Result<Self> {
        let baud_rate = map_baud_rate(config.baud_rate);
        info!(
            "⚙️  Configuration: {} baud, {} data bits, {} stop bit(s), parity {:?}, flow control {:?}",
            baud_rate, config.data_bits, config.stop_bits, config.parity, config.flow_control
        );

        let mut port = serialport::new(config.serial_port.as_str(), baud_rate)
            .data_bits(map_data_bits(config.data_bits)?)
            .stop_bits(map_stop_bits(config.stop_bits)?)
            .parity(map_parity(config.parity))
            .flow_control(map_flow_control(config.flow_control))
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| {
                error!("❌ Failed to open serial port {}: {}", config.serial_port, e);
                ModbusError::InitError(format!("failed to open {}: {}", config.serial_port, e))
            })?;

        port.discard_input().map_err(|e| {
            ModbusError::InitError(format!("failed to flush {}: {}", config.serial_port, e))
        })?;

        info!("✅ Modbus RTU link {} ready", config.serial_port);
        Ok(Self::with_link(
            Box::new(port),
            &config.serial_port,
            config.slave_address,
            config.timing.to_timing(),
            frame_size,
        ))
    }

    /// Builds a transport over an already opened link.
    pub fn with_link(
        link: Box<dyn SerialLink>,
        port_name: &str,
        slave_address: u8,
        timing: Timing,
        frame_size: usize,
    ) -> Self {
        Self {
            link: Some(link),
            port_name: port_name.to_string(),
            buffer: FrameBuffer::new(frame_size),
            timing,
            slave_address,
            last_rx_address: None,
            last_tx_crc: 0,
            last_rx_crc: 0,
        }
    }

    pub fn slave_address(&self) -> u8 {
        self.slave_address
    }

    pub fn last_rx_address(&self) -> Option<u8> {
        self.last_rx_address
    }

    pub fn last_tx_crc(&self) -> u16 {
        self.last_tx_crc
    }

    pub fn last_rx_crc(&self) -> u16 {
        self.last_rx_crc
    }

    /// Checks address and CRC of the accumulated frame, then decodes the PDU.
    fn parse_reply(&mut self, exchange: &mut Exchange) -> Result<()> {
        let len = self.buffer.len();
        if len < MIN_RTU_FRAME {
            return Err(ModbusError::Truncated {
                needed: MIN_RTU_FRAME,
                available: len,
            });
        }

        let frame = self.buffer.as_slice();
        let address = frame[0];
        let received = u16::from_le_bytes([frame[len - 2], frame[len - 1]]);
        let expected = crc16_modbus(&frame[..len - 2]);
        self.last_rx_address = Some(address);
        self.last_rx_crc = received;

        if address != self.slave_address {
            return Err(ModbusError::ProtocolError(format!(
                "reply from slave {} while talking to slave {}",
                address, self.slave_address
            )));
        }
        if received != expected {
            warn!(
                "⚠️ CRC mismatch on {}: expected {:04X}, received {:04X}",
                self.port_name, expected, received
            );
            return Err(ModbusError::ChecksumError { expected, received });
        }

        self.buffer.truncate(len - 2);
        self.buffer.seek(1)?;
        codec::decode(&mut self.buffer, exchange)
    }
}

impl ModbusTransport for RtuTransport {
    fn send(&mut self, exchange: &Exchange) -> Result<usize> {
        self.buffer.clear();
        self.buffer.put_u8(self.slave_address)?;
        codec::encode(&mut self.buffer, exchange)?;

        let crc = crc16_modbus(self.buffer.as_slice());
        self.buffer.put_slice(&crc.to_le_bytes())?;
        self.last_tx_crc = crc;

        debug!("📤 RTU TX [{}]: {}", self.port_name, frame_hex(self.buffer.as_slice()));

        let link = self.link.as_mut().ok_or(ModbusError::NotConnected)?;
        if let Err(e) = link.write_frame(self.buffer.as_slice()) {
            error!("❌ RTU write failed on {}: {}", self.port_name, e);
            // drop whatever partial reply might follow
            let _ = link.discard_input();
            return Err(e);
        }

        Ok(self.buffer.len())
    }

    fn recv(&mut self, exchange: &mut Exchange) -> Result<usize> {
        self.buffer.clear();
        let timing = self.timing;
        let poll = timing.idle_delay.max(Duration::from_micros(100));

        let link = self.link.as_mut().ok_or(ModbusError::NotConnected)?;
        wait_ready(timing.ready_timeout, poll, || Ok(link.bytes_available()? > 0)).map_err(|e| {
            debug!("⏱️ No reply from slave within {:?}", timing.ready_timeout);
            e
        })?;

        let result = accumulate(&mut self.buffer, &timing, |spare| match link.read_available(spare)? {
            0 => Ok(ReadOutcome::Empty),
            n => Ok(ReadOutcome::Data(n)),
        });
        if let Err(e) = result {
            warn!("⚠️ RTU reply on {} rejected: {}", self.port_name, e);
            let _ = link.discard_input();
            return Err(e);
        }

        debug!("📥 RTU RX [{}]: {}", self.port_name, frame_hex(self.buffer.as_slice()));

        self.parse_reply(exchange)?;
        Ok(self.buffer.len() + 2)
    }

    fn close(&mut self) -> Result<()> {
        if self.link.take().is_some() {
            info!("🔌 Closed serial port {}", self.port_name);
        }
        Ok(())
    }
}
