//! Shared OSC listener hub
//!
//! Multiple logical producers may want to listen on the same UDP port but
//! different OSC addresses. The hub keeps one socket and reader thread per
//! port, a per-port dispatch table keyed by exact address string, and ordered
//! callback lists per address so independent subscribers coexist.
//!
//! Teardown is reference-counted: removing the last callback for an address
//! drops that address's dispatch entry, and removing the last address for a
//! port stops the reader thread and closes the socket. Reader threads poll
//! with a read timeout so teardown is bounded.
//!
//! The hub is an explicitly constructed service with `new()`/`shutdown()`;
//! it is passed by handle to every call site, never a process-global.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::osc::OscMessage;

/// How long a reader thread blocks before re-checking its stop flag
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest datagram a reader accepts
const MAX_DATAGRAM: usize = 1536;

/// Callback invoked with each message whose address exactly matches
pub type OscCallback = Arc<dyn Fn(&OscMessage) + Send + Sync>;

/// Stable id handed out at registration, used to remove a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    #[error("listener hub is shut down")]
    ShutDown,
}

struct Registration {
    id: CallbackId,
    callback: OscCallback,
}

/// address -> ordered callback list
type DispatchTable = HashMap<String, Vec<Registration>>;

struct PortListener {
    table: Arc<Mutex<DispatchTable>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PortListener {
    fn stop_and_join(mut self, port: u16) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(port, "listener thread panicked during teardown");
            }
        }
        info!(port, "listener closed");
    }
}

/// Shared per-port OSC listener service
pub struct OscListenerHub {
    ports: Mutex<HashMap<u16, PortListener>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl OscListenerHub {
    pub fn new() -> Self {
        Self {
            ports: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Register a callback for `(port, address)`.
    ///
    /// Reuses the existing listener for `port` or binds a new one. The
    /// returned id removes exactly this registration.
    pub fn register(
        &self,
        port: u16,
        address: &str,
        callback: OscCallback,
    ) -> Result<CallbackId, ListenerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(ListenerError::ShutDown);
        }

        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration { id, callback };

        let mut ports = self.ports.lock().unwrap();
        if let Some(listener) = ports.get(&port) {
            listener
                .table
                .lock()
                .unwrap()
                .entry(address.to_string())
                .or_default()
                .push(registration);
            debug!(port, address, "reusing listener");
            return Ok(id);
        }

        let socket = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|source| ListenerError::Bind { port, source })?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|source| ListenerError::Bind { port, source })?;

        let mut table = DispatchTable::new();
        table.insert(address.to_string(), vec![registration]);
        let table = Arc::new(Mutex::new(table));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let table = table.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("osc-listener-{port}"))
                .spawn(move || reader_loop(socket, table, stop))
                .map_err(|source| ListenerError::Bind { port, source })?
        };

        ports.insert(
            port,
            PortListener {
                table,
                stop,
                handle: Some(handle),
            },
        );
        info!(port, address, "listener opened");
        Ok(id)
    }

    /// Remove one registration. Returns whether it was found.
    ///
    /// The last callback removed for an address drops the address entry; the
    /// last address removed for a port tears the listener down.
    pub fn unregister(&self, port: u16, address: &str, id: CallbackId) -> bool {
        let mut ports = self.ports.lock().unwrap();
        let Some(listener) = ports.get(&port) else {
            return false;
        };

        let (found, table_empty) = {
            let mut table = listener.table.lock().unwrap();
            let Some(callbacks) = table.get_mut(address) else {
                return false;
            };
            let before = callbacks.len();
            callbacks.retain(|r| r.id != id);
            let found = callbacks.len() < before;
            if callbacks.is_empty() {
                table.remove(address);
                debug!(port, address, "address entry removed");
            }
            (found, table.is_empty())
        };

        if table_empty {
            if let Some(listener) = ports.remove(&port) {
                drop(ports);
                listener.stop_and_join(port);
            }
        }
        found
    }

    /// Number of live port listeners
    pub fn port_count(&self) -> usize {
        self.ports.lock().unwrap().len()
    }

    /// Stop every listener and refuse further registrations
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let drained: Vec<(u16, PortListener)> =
            self.ports.lock().unwrap().drain().collect();
        for (port, listener) in drained {
            listener.stop_and_join(port);
        }
    }
}

impl Default for OscListenerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OscListenerHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader_loop(socket: UdpSocket, table: Arc<Mutex<DispatchTable>>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::Relaxed) {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "listener socket error");
                continue;
            }
        };

        let message = match OscMessage::decode(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                debug!(%peer, error = %e, "dropping undecodable datagram");
                continue;
            }
        };

        // Clone callbacks out so the table lock is not held during dispatch
        let callbacks: Vec<OscCallback> = {
            let table = table.lock().unwrap();
            table
                .get(&message.address)
                .map(|regs| regs.iter().map(|r| r.callback.clone()).collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            callback(&message);
        }
    }
}
