use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use super::buffer::FrameBuffer;
use super::codec;
use super::protocol::Exchange;
use super::transport::{accumulate, ModbusTransport, ReadOutcome, Timing};
use crate::config::settings::TcpConfig;
use crate::utils::error::{ModbusError, Result};
use crate::utils::logging::frame_hex;

pub const MBAP_HEADER_LEN: usize = 7;
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Largest TCP frame: MBAP header plus a 253-byte PDU.
pub const MAX_TCP_ADU: usize = 260;

// offset of the length field inside the MBAP header
const LENGTH_OFFSET: usize = 4;

/// ModBus application protocol header that prefixes every TCP frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    // unit id + PDU
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    fn write(&self, buf: &mut FrameBuffer) -> Result<()> {
        buf.put_u16(self.transaction_id)?;
        buf.put_u16(self.protocol_id)?;
        buf.put_u16(self.length)?;
        buf.put_u8(self.unit_id)
    }

    fn read(buf: &mut FrameBuffer) -> Result<Self> {
        Ok(Self {
            transaction_id: buf.get_u16()?,
            protocol_id: buf.get_u16()?,
            length: buf.get_u16()?,
            unit_id: buf.get_u8()?,
        })
    }
}

fn connect_socket(
    target: SocketAddr,
    interface: Option<&str>,
    timeout: Duration,
) -> Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(target), Type::STREAM, Some(Protocol::TCP))?;

    if let Some(interface) = interface {
        bind_interface(&socket, interface)?;
    }

    socket.connect_timeout(&SockAddr::from(target), timeout)?;

    if let Err(e) = socket.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    Ok(socket.into())
}

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
fn bind_interface(socket: &Socket, interface: &str) -> Result<()> {
    socket.bind_device(Some(interface.as_bytes())).map_err(|e| {
        ModbusError::InitError(format!("failed to bind to interface {}: {}", interface, e))
    })
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
fn bind_interface(_socket: &Socket, interface: &str) -> Result<()> {
    warn!(
        "⚠️ Binding to interface {} is not supported on this platform, ignoring",
        interface
    );
    Ok(())
}

/// Live check of an open stream: no pending socket error and the peer has
/// not closed its side.
/// Reads and drops whatever is pending on a non-blocking stream.
fn drain_pending(stream: &mut TcpStream) -> usize {
    let mut scratch = [0u8; 256];
    let mut dropped = 0;
    loop {
        match stream.read(&mut scratch) {
            Ok(0) => return dropped,
            Ok(n) => dropped += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return dropped,
        }
    }
}

fn is_established(stream: &TcpStream) -> bool {
    match stream.take_error() {
        Ok(None) => {}
        Ok(Some(e)) => {
            debug!("socket error pending: {}", e);
            return false;
        }
        Err(_) => return false,
    }

    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut probe = [0u8; 1];
    let state = match stream.peek(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) => e.kind() == ErrorKind::WouldBlock,
    };
    let _ = stream.set_nonblocking(false);
    state
}

pub struct TcpTransport {
    stream: Option<TcpStream>,
    target: SocketAddr,
    interface: Option<String>,
    unit_id: u8,
    connect_timeout: Duration,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    timing: Timing,
    buffer: FrameBuffer,
    transaction_id: u16,
    last_tx: MbapHeader,
    last_rx: Option<MbapHeader>,
    closed: bool,
}

impl TcpTransport {
    pub fn open(config: &TcpConfig, frame_size: usize) -> Result<Self> {
        let target = SocketAddr::new(config.ip_addr()?, config.port);
        let interface = config.interface.clone();

        let stream = connect_socket(target, interface.as_deref(), config.connect_timeout())
            .map_err(|e| {
                error!("❌ Failed to connect to {}: {}", target, e);
                ModbusError::InitError(format!("failed to connect to {}: {}", target, e))
            })?;

        info!("✅ Connected to Modbus TCP server {} (unit {})", target, config.unit_id);

        Ok(Self {
            stream: Some(stream),
            target,
            interface,
            unit_id: config.unit_id,
            connect_timeout: config.connect_timeout(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            timing: config.timing.to_timing(),
            buffer: FrameBuffer::new(frame_size),
            transaction_id: 0,
            last_tx: MbapHeader::default(),
            last_rx: None,
            closed: false,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn last_tx_header(&self) -> MbapHeader {
        self.last_tx
    }

    pub fn last_rx_header(&self) -> Option<MbapHeader> {
        self.last_rx
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Replaces the current socket with a fresh connection.
    fn reconnect(&mut self) -> Result<()> {
        for attempt in 1..=self.reconnect_attempts {
            self.drop_stream();
            match connect_socket(self.target, self.interface.as_deref(), self.connect_timeout) {
                Ok(stream) => {
                    self.stream = Some(stream);
                    info!("🔄 Reconnected to {} after {} attempt(s)", self.target, attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "⚠️ Reconnect attempt {}/{} to {} failed: {}",
                        attempt, self.reconnect_attempts, self.target, e
                    );
                    thread::sleep(self.reconnect_delay);
                }
            }
        }

        self.drop_stream();
        error!("❌ Giving up on {} after {} attempts", self.target, self.reconnect_attempts);
        Err(ModbusError::ReconnectFailed {
            attempts: self.reconnect_attempts,
        })
    }

    /// Returns true when the connection had to be re-established.
    fn ensure_connected(&mut self) -> Result<bool> {
        if self.closed {
            return Err(ModbusError::NotConnected);
        }
        if let Some(stream) = &self.stream {
            if is_established(stream) {
                return Ok(false);
            }
            warn!("⚠️ Connection to {} lost", self.target);
        }
        self.reconnect()?;
        Ok(true)
    }

    /// Blocks until the socket has data, the peer closes, or the ready timeout
    /// expires. Returns false when the peer closed.
    fn wait_readable(&mut self) -> Result<bool> {
        let timeout = self.timing.ready_timeout;
        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(timeout))?;

        let mut probe = [0u8; 1];
        match stream.peek(&mut probe) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                debug!("⏱️ No reply from {} within {:?}", self.target, timeout);
                Err(ModbusError::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Gathers one reply into the buffer. Returns false when the peer closed.
    fn read_frame(&mut self) -> Result<bool> {
        if !self.wait_readable()? {
            return Ok(false);
        }

        let timing = self.timing;
        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;
        stream.set_nonblocking(true)?;
        let result = accumulate(&mut self.buffer, &timing, |spare| match stream.read(spare) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(ReadOutcome::Empty)
            }
            Err(e) => Err(e.into()),
        });
        if let Err(ModbusError::BufferOverflow { .. }) = &result {
            let dropped = drain_pending(stream);
            warn!("⚠️ Oversized reply from {}, {} more bytes drained", self.target, dropped);
        }
        let _ = stream.set_nonblocking(false);

        let accumulated = result?;
        Ok(!(accumulated.peer_closed && accumulated.len == 0))
    }

    fn parse_reply(&mut self, exchange: &mut Exchange) -> Result<()> {
        let received = self.buffer.len();
        let header = MbapHeader::read(&mut self.buffer)?;
        self.last_rx = Some(header);

        if header.transaction_id != self.last_tx.transaction_id {
            return Err(ModbusError::ProtocolError(format!(
                "transaction id {} does not match request {}",
                header.transaction_id, self.last_tx.transaction_id
            )));
        }
        if header.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(ModbusError::ProtocolError(format!(
                "unexpected protocol id {}",
                header.protocol_id
            )));
        }
        if header.unit_id != self.unit_id {
            return Err(ModbusError::ProtocolError(format!(
                "reply from unit {} while talking to unit {}",
                header.unit_id, self.unit_id
            )));
        }
        let expected = received - (MBAP_HEADER_LEN - 1);
        if header.length as usize != expected {
            return Err(ModbusError::ProtocolError(format!(
                "MBAP length {} does not match {} bytes received",
                header.length, expected
            )));
        }

        codec::decode(&mut self.buffer, exchange)
    }
}

impl ModbusTransport for TcpTransport {
    fn send(&mut self, exchange: &Exchange) -> Result<usize> {
        self.ensure_connected()?;

        self.buffer.clear();
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let mut header = MbapHeader {
            transaction_id: self.transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: 0,
            unit_id: self.unit_id,
        };
        header.write(&mut self.buffer)?;
        codec::encode(&mut self.buffer, exchange)?;

        header.length = (self.buffer.len() - (MBAP_HEADER_LEN - 1)) as u16;
        self.buffer.patch_u16(LENGTH_OFFSET, header.length)?;
        self.last_tx = header;

        debug!("📤 TCP TX [{}]: {}", self.target, frame_hex(self.buffer.as_slice()));

        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;
        stream
            .write_all(self.buffer.as_slice())
            .and_then(|_| stream.flush())
            .map_err(|e| {
                error!("❌ TCP write to {} failed: {}", self.target, e);
                ModbusError::WriteError(format!("write to {} failed: {}", self.target, e))
            })?;

        Ok(self.buffer.len())
    }

    fn recv(&mut self, exchange: &mut Exchange) -> Result<usize> {
        self.ensure_connected()?;
        self.buffer.clear();

        if !self.read_frame()? {
            warn!("⚠️ {} closed the connection while awaiting a reply", self.target);
            self.reconnect()?;
            self.buffer.clear();
            if !self.read_frame()? {
                return Err(ModbusError::Timeout);
            }
        }

        if self.buffer.is_empty() {
            return Err(ModbusError::Timeout);
        }

        debug!("📥 TCP RX [{}]: {}", self.target, frame_hex(self.buffer.as_slice()));

        self.parse_reply(exchange)?;
        Ok(self.buffer.len())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        if self.stream.is_some() {
            self.drop_stream();
            info!("🔌 Disconnected from {}", self.target);
        }
        Ok(())
    }
}
