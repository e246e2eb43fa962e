use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};

use super::buffer::FrameBuffer;
use super::protocol::Exchange;
use super::rtu::RtuTransport;
use super::tcp::TcpTransport;
use crate::config::settings::{Config, TransportConfig};
use crate::utils::error::{ModbusError, Result};

/// Receive timing that decides where a reply frame ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub ready_timeout: Duration,
    pub idle_delay: Duration,
    pub idle_limit: u32,
}

/// Result of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    Empty,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulated {
    pub len: usize,
    pub peer_closed: bool,
}

/// Polls `ready` until it reports true or `timeout` elapses.
pub fn wait_ready<F>(timeout: Duration, poll: Duration, mut ready: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if ready()? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ModbusError::Timeout);
        }
        thread::sleep(poll);
    }
}

/// Reads into `buf` until `idle_limit` consecutive empty polls or the peer
/// closes. Any data resets the idle counter.
///
/// Data that arrives once the buffer is full is read into a scratch area and
/// dropped, and the call ends with `BufferOverflow` instead of a clipped frame.
pub fn accumulate<F>(buf: &mut FrameBuffer, timing: &Timing, mut read: F) -> Result<Accumulated>
where
    F: FnMut(&mut [u8]) -> Result<ReadOutcome>,
{
    let start = buf.len();
    let mut idle = 0u32;
    let mut scratch = [0u8; 64];
    let mut dropped = 0usize;

    while idle < timing.idle_limit {
        let full = buf.spare_mut().is_empty();
        let target = if full { &mut scratch[..] } else { buf.spare_mut() };
        match read(target)? {
            ReadOutcome::Data(n) if full => {
                dropped += n;
                idle = 0;
            }
            ReadOutcome::Data(n) => {
                buf.advance(n)?;
                idle = 0;
            }
            ReadOutcome::Empty => {
                idle += 1;
                thread::sleep(timing.idle_delay);
            }
            ReadOutcome::Closed => {
                if dropped > 0 {
                    break;
                }
                return Ok(Accumulated {
                    len: buf.len() - start,
                    peer_closed: true,
                });
            }
        }
    }

    if dropped > 0 {
        debug!("frame buffer full, {} trailing bytes dropped", dropped);
        return Err(ModbusError::BufferOverflow {
            needed: buf.len() + dropped,
            available: buf.capacity(),
        });
    }

    Ok(Accumulated {
        len: buf.len() - start,
        peer_closed: false,
    })
}

/// Common interface of the framed links.
pub trait ModbusTransport: Send {
    /// Frames and transmits the request. Returns the bytes written.
    fn send(&mut self, exchange: &Exchange) -> Result<usize>;

    /// Waits for, validates and decodes the reply. Returns the bytes received.
    fn recv(&mut self, exchange: &mut Exchange) -> Result<usize>;

    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Rtu,
    Tcp,
}

pub enum Transport {
    Rtu(RtuTransport),
    Tcp(TcpTransport),
}

impl Transport {
    pub fn open(config: &Config) -> Result<Self> {
        match &config.transport {
            TransportConfig::Rtu(rtu) => {
                info!("🔌 Opening Modbus RTU transport on {}", rtu.serial_port);
                Ok(Transport::Rtu(RtuTransport::open(rtu, config.max_frame_size)?))
            }
            TransportConfig::Tcp(tcp) => {
                info!("🌐 Opening Modbus TCP transport to {}:{}", tcp.ip, tcp.port);
                Ok(Transport::Tcp(TcpTransport::open(tcp, config.max_frame_size)?))
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Rtu(_) => TransportKind::Rtu,
            Transport::Tcp(_) => TransportKind::Tcp,
        }
    }
}

impl ModbusTransport for Transport {
    fn send(&mut self, exchange: &Exchange) -> Result<usize> {
        match self {
            Transport::Rtu(rtu) => rtu.send(exchange),
            Transport::Tcp(tcp) => tcp.send(exchange),
        }
    }

    fn recv(&mut self, exchange: &mut Exchange) -> Result<usize> {
        match self {
            Transport::Rtu(rtu) => rtu.recv(exchange),
            Transport::Tcp(tcp) => tcp.recv(exchange),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Transport::Rtu(rtu) => rtu.close(),
            Transport::Tcp(tcp) => tcp.close(),
        }
    }
}
