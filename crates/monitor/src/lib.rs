//! # Monitor — cluster-map registry
//!
//! A single-writer registry of `server id → address`. Storage servers
//! register themselves at startup; clients fetch the listing once when they
//! construct their placement mapper. That is the monitor's entire job — it
//! takes no part in placement, failure detection, or any per-operation path,
//! and the store keeps working for connected clients if the monitor goes
//! away.
//!
//! The servicer is a plain blocking TCP loop, one thread per connection,
//! speaking the length-prefixed frames of the [`proto`] crate.

use proto::{
    recv_frame, send_frame, MonitorRequest, MonitorResponse, ProtoError, RpcError, RpcErrorKind,
    ServerInfo,
};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("unexpected response from monitor")]
    UnexpectedResponse,
}

/// The registry itself: id-sorted, ids start at 1.
#[derive(Debug, Default)]
pub struct ClusterMap {
    servers: BTreeMap<u32, SocketAddr>,
}

impl ClusterMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server. `id = 0` assigns the next free id.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when forcing an id that is taken, `InvalidArgument`
    /// when the address does not parse.
    pub fn add_server(&mut self, id: u32, addr: &str) -> Result<u32, RpcError> {
        let addr: SocketAddr = addr.parse().map_err(|_| {
            RpcError::new(RpcErrorKind::InvalidArgument, format!("bad address {addr:?}"))
        })?;

        let new_id = if id != 0 {
            if self.servers.contains_key(&id) {
                return Err(RpcError::new(
                    RpcErrorKind::AlreadyExists,
                    format!("server id {id} already registered"),
                ));
            }
            id
        } else {
            self.servers.keys().next_back().map_or(1, |last| last + 1)
        };

        self.servers.insert(new_id, addr);
        Ok(new_id)
    }

    /// The listing, ordered by id ascending.
    #[must_use]
    pub fn servers(&self) -> Vec<ServerInfo> {
        self.servers
            .iter()
            .map(|(&id, addr)| ServerInfo {
                id,
                addr: addr.to_string(),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// Blocking monitor service.
pub struct Monitor {
    listener: TcpListener,
    map: Mutex<ClusterMap>,
    stopping: AtomicBool,
}

impl Monitor {
    /// Binds the service. Pass a port of 0 to let the OS choose (tests).
    pub fn bind(addr: &str) -> Result<Arc<Self>, MonitorError> {
        let listener = TcpListener::bind(addr)?;
        info!(addr = %listener.local_addr()?, "cluster-map service listening");
        Ok(Arc::new(Self {
            listener,
            map: Mutex::new(ClusterMap::new()),
            stopping: AtomicBool::new(false),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("listener has an address")
    }

    /// Accepts connections until [`stop`](Self::stop) is called.
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
        info!("cluster-map service stopped");
    }

    /// Signals `run` to return and wakes the accept loop.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Unblock accept with a throwaway connection.
        let _ = TcpStream::connect(self.local_addr());
    }

    fn serve_conn(&self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        loop {
            let req: MonitorRequest = match recv_frame(&mut stream) {
                Ok(req) => req,
                Err(ProtoError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => return,
                Err(e) => {
                    debug!(%peer, error = %e, "dropping connection");
                    return;
                }
            };

            let resp = match req {
                MonitorRequest::AddServer { id, addr } => {
                    match self.map.lock().expect("map lock").add_server(id, &addr) {
                        Ok(id) => {
                            info!(id, %addr, "registered server");
                            MonitorResponse::ServerAdded { id }
                        }
                        Err(e) => {
                            warn!(%peer, error = %e, "AddServer rejected");
                            MonitorResponse::Error(e)
                        }
                    }
                }
                MonitorRequest::GetServers => {
                    debug!(%peer, "GetServers");
                    MonitorResponse::Servers(self.map.lock().expect("map lock").servers())
                }
            };

            if let Err(e) = send_frame(&mut stream, &resp) {
                debug!(%peer, error = %e, "reply failed");
                return;
            }
        }
    }
}

/// Blocking client half of the monitor RPC.
pub struct MonitorClient {
    addr: String,
    timeout: Duration,
}

impl MonitorClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    fn call(&self, req: &MonitorRequest) -> Result<MonitorResponse, MonitorError> {
        let sa = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "unresolvable address"))?;
        let mut stream = TcpStream::connect_timeout(&sa, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        send_frame(&mut stream, req)?;
        Ok(recv_frame(&mut stream)?)
    }

    /// Registers a server, returning the (possibly assigned) id.
    pub fn add_server(&self, id: u32, addr: &str) -> Result<u32, MonitorError> {
        match self.call(&MonitorRequest::AddServer {
            id,
            addr: addr.to_owned(),
        })? {
            MonitorResponse::ServerAdded { id } => Ok(id),
            MonitorResponse::Error(e) => Err(e.into()),
            MonitorResponse::Servers(_) => Err(MonitorError::UnexpectedResponse),
        }
    }

    /// Fetches the id-ordered server listing.
    pub fn get_servers(&self) -> Result<Vec<ServerInfo>, MonitorError> {
        match self.call(&MonitorRequest::GetServers)? {
            MonitorResponse::Servers(list) => Ok(list),
            MonitorResponse::Error(e) => Err(e.into()),
            MonitorResponse::ServerAdded { .. } => Err(MonitorError::UnexpectedResponse),
        }
    }
}

#[cfg(test)]
mod tests;
