use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::protocol::Exchange;
use super::transport::{ModbusTransport, Transport, TransportKind};
use crate::config::settings::{Config, KeepAliveConfig};
use crate::utils::error::{ModbusError, Result};

// fixed probe issued by the keep-alive thread
const KEEPALIVE_ADDRESS: u16 = 0;
const KEEPALIVE_COUNT: u16 = 16;

struct MasterState {
    transport: Transport,
    stay: bool,
}

struct Shared {
    state: Mutex<MasterState>,
    running: AtomicBool,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, MasterState>> {
        self.state.lock().map_err(|_| ModbusError::LockError)
    }
}

/// Thread-safe ModBus master over either an RTU or a TCP link.
///
/// Every transport access goes through one mutex, so exchanges issued from
/// several threads (and the keep-alive poller) are totally ordered.
pub struct ModbusMaster {
    kind: TransportKind,
    shared: Arc<Shared>,
    keepalive: Option<JoinHandle<()>>,
}

impl ModbusMaster {
    pub fn init(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = Transport::open(config)?;
        Self::from_transport(transport, &config.keepalive)
    }

    /// Wraps an already opened transport and starts the keep-alive thread.
    pub fn from_transport(transport: Transport, keepalive: &KeepAliveConfig) -> Result<Self> {
        let kind = transport.kind();
        let shared = Arc::new(Shared {
            state: Mutex::new(MasterState {
                transport,
                stay: keepalive.enabled,
            }),
            running: AtomicBool::new(true),
        });

        let tick = keepalive.tick();
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("modbus-keepalive".to_string())
            .spawn(move || keepalive_loop(worker, tick))
            .map_err(|e| ModbusError::InitError(format!("failed to start keep-alive thread: {}", e)))?;

        info!("🚀 Modbus master ready ({:?})", kind);
        Ok(Self {
            kind,
            shared,
            keepalive: Some(handle),
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn send(&self, exchange: &Exchange) -> Result<usize> {
        exchange.validate()?;
        let mut state = self.shared.lock()?;
        state.transport.send(exchange)
    }

    pub fn recv(&self, exchange: &mut Exchange) -> Result<usize> {
        exchange.validate()?;
        let mut state = self.shared.lock()?;
        state.transport.recv(exchange)
    }

    /// Sends the request and waits for its reply without releasing the lock
    /// in between. Returns the reply size in bytes.
    pub fn execute(&self, exchange: &mut Exchange) -> Result<usize> {
        exchange.validate()?;
        let mut state = self.shared.lock()?;
        round_trip(&mut state, exchange)
    }

    pub fn stay_set(&self, enabled: bool) -> Result<()> {
        let mut state = self.shared.lock()?;
        if state.stay != enabled {
            debug!("keep-alive {}", if enabled { "enabled" } else { "disabled" });
        }
        state.stay = enabled;
        Ok(())
    }

    pub fn stay_get(&self) -> Result<bool> {
        Ok(self.shared.lock()?.stay)
    }

    /// Stops the keep-alive thread and closes the transport.
    pub fn close(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);

        if let Some(handle) = self.keepalive.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("❌ Keep-alive thread panicked");
            }
        }

        let mut state = self.shared.lock()?;
        state.transport.close()
    }
}

impl Drop for ModbusMaster {
    fn drop(&mut self) {
        if self.keepalive.is_some() {
            if let Err(e) = self.close() {
                warn!("⚠️ Error while closing Modbus master: {}", e);
            }
        }
    }
}

fn round_trip(state: &mut MasterState, exchange: &mut Exchange) -> Result<usize> {
    state.transport.send(exchange)?;
    state.transport.recv(exchange)
}

fn keepalive_loop(shared: Arc<Shared>, tick: Duration) {
    debug!("keep-alive thread started, tick {:?}", tick);

    while shared.running.load(Ordering::Acquire) {
        let deadline = Instant::now() + tick;
        loop {
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        let mut state = match shared.lock() {
            Ok(state) => state,
            Err(e) => {
                error!("❌ Keep-alive stopped: {}", e);
                break;
            }
        };
        if !state.stay {
            continue;
        }

        let mut probe = Exchange::read_coils(KEEPALIVE_ADDRESS, KEEPALIVE_COUNT);
        let result = round_trip(&mut state, &mut probe);
        drop(state);

        match result {
            Ok(_) if probe.is_exception() => {
                debug!("keep-alive probe answered with exception {:?}", probe.exception)
            }
            Ok(_) => trace!("keep-alive probe ok"),
            Err(e) => warn!("⚠️ Keep-alive probe failed: {}", e),
        }
    }

    debug!("keep-alive thread stopped");
}
