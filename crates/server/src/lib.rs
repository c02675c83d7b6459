//! # Server — bootstrap and session servicer
//!
//! The server's whole data-plane job happens at startup: map a persistent
//! region, register it for one-sided access under a fresh region key, and
//! advertise itself to the monitor. After that it only babysits sessions — a
//! control thread accepts client connections, answers each `Connect` with
//! the region descriptor, and holds the connection open until the client
//! disconnects. It never reads a slot on a client's behalf.

use hashtable::{LocalTable, TableError};
use monitor::{MonitorClient, MonitorError};
use proto::{
    recv_frame, send_frame, ProtoError, RpcError, RpcErrorKind, SessionRequest, SessionResponse,
};
use rmem::{RegionFile, RmemError};
use serde::Deserialize;
use slot::SLOT_LEN;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Rmem(#[from] RmemError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("configuration: {0}")]
    Configuration(&'static str),
}

/// Server configuration. Field names follow the cluster config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub monitor_address: String,
    /// Control endpoint clients connect to.
    pub listen_addr: String,
    /// Backing file for the slot region (fsdax or plain file).
    pub region_path: String,
    /// Region capacity in slots.
    pub region_slots: u64,
    /// Server id; 0 lets the monitor assign one.
    pub id: u32,
    pub rpc_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            monitor_address: "127.0.0.1:9100".into(),
            listen_addr: "127.0.0.1:9200".into(),
            region_path: "driftkv-region.pm".into(),
            region_slots: 4096,
            id: 0,
            rpc_timeout_ms: 2_000,
        }
    }
}

/// Server runtime.
pub struct Server {
    id: u32,
    region: RegionFile,
    listener: TcpListener,
    connected: Mutex<HashSet<u32>>,
    stopping: AtomicBool,
}

impl Server {
    /// Maps (and optionally formats) the region, registers with the monitor,
    /// and binds the session endpoint.
    pub fn create(cfg: &ServerConfig, format: bool) -> Result<Arc<Self>, ServerError> {
        if cfg.region_slots == 0 {
            return Err(ServerError::Configuration("region_slots must be positive"));
        }

        let rkey: u32 = rand::random();
        let mut region = RegionFile::create(
            cfg.region_path.as_ref(),
            cfg.region_slots * SLOT_LEN as u64,
            rkey,
        )?;
        if format {
            LocalTable::new(region.bytes_mut(), hashtable::DEFAULT_PROBE_WINDOW)?.clear();
            region.sync()?;
            info!(path = %cfg.region_path, "region formatted");
        }

        let listener = TcpListener::bind(&cfg.listen_addr)?;
        let advertised = listener.local_addr()?.to_string();

        let monitor = MonitorClient::new(
            cfg.monitor_address.as_str(),
            Duration::from_millis(cfg.rpc_timeout_ms),
        );
        let id = monitor.add_server(cfg.id, &advertised)?;

        info!(
            id,
            addr = %advertised,
            slots = cfg.region_slots,
            rkey,
            "server up"
        );
        Ok(Arc::new(Self {
            id,
            region,
            listener,
            connected: Mutex::new(HashSet::new()),
            stopping: AtomicBool::new(false),
        }))
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("listener has an address")
    }

    /// The mapped region, for formatting tools and tests.
    #[must_use]
    pub fn region(&self) -> &RegionFile {
        &self.region
    }

    /// Fraction of slots carrying committed data. O(capacity); diagnostics
    /// only — the server never interprets slots on the data path.
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        let bytes = self.region.bytes();
        let total = bytes.len() / SLOT_LEN;
        let valid = bytes
            .chunks_exact(SLOT_LEN)
            .filter(|s| slot::word_is_valid(slot::read_word(s)))
            .count();
        valid as f64 / total as f64
    }

    /// Accepts sessions until [`stop`](Self::stop) is called.
    pub fn run(self: &Arc<Self>) {
        loop {
            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            let this = Arc::clone(self);
            std::thread::spawn(move || this.serve_conn(stream));
        }
        info!(id = self.id, "server stopped");
    }

    /// Signals `run` to return and wakes the accept loop.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = TcpStream::connect(self.local_addr());
    }

    fn serve_conn(&self, mut stream: TcpStream) {
        let first: SessionRequest = match recv_frame(&mut stream) {
            Ok(req) => req,
            Err(_) => return,
        };

        match first {
            SessionRequest::Connect { client_id } => {
                {
                    let mut connected = self.connected.lock().expect("client registry");
                    if !connected.insert(client_id) {
                        warn!(client_id, "rejecting duplicate connect");
                        let _ = send_frame(
                            &mut stream,
                            &SessionResponse::Error(RpcError::new(
                                RpcErrorKind::AlreadyExists,
                                "client already connected",
                            )),
                        );
                        return;
                    }
                }
                info!(client_id, "session opened");
                if send_frame(
                    &mut stream,
                    &SessionResponse::Region(self.region.descriptor().clone()),
                )
                .is_err()
                {
                    self.forget(client_id);
                    return;
                }
                self.hold_session(&mut stream, client_id);
            }
            SessionRequest::Disconnect { client_id } => {
                // A disconnect for an unknown client is ignored, not an
                // error: the session may have died with its connection.
                if !self.forget(client_id) {
                    warn!(client_id, "disconnect for unconnected client, ignoring");
                }
                let _ = send_frame(&mut stream, &SessionResponse::Disconnected);
            }
        }
    }

    /// Parks on the session connection until the client disconnects or the
    /// stream closes.
    fn hold_session(&self, stream: &mut TcpStream, client_id: u32) {
        loop {
            match recv_frame::<_, SessionRequest>(stream) {
                Ok(SessionRequest::Disconnect { client_id: cid }) => {
                    self.forget(cid);
                    let _ = send_frame(stream, &SessionResponse::Disconnected);
                    info!(client_id = cid, "session closed");
                    return;
                }
                Ok(SessionRequest::Connect { .. }) => {
                    let _ = send_frame(
                        stream,
                        &SessionResponse::Error(RpcError::new(
                            RpcErrorKind::InvalidArgument,
                            "session already established",
                        )),
                    );
                }
                Err(ProtoError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!(client_id, "session connection dropped");
                    self.forget(client_id);
                    return;
                }
                Err(e) => {
                    warn!(client_id, error = %e, "session connection error");
                    self.forget(client_id);
                    return;
                }
            }
        }
    }

    fn forget(&self, client_id: u32) -> bool {
        self.connected.lock().expect("client registry").remove(&client_id)
    }

    /// Connected client count, for diagnostics.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.connected.lock().expect("client registry").len()
    }
}
