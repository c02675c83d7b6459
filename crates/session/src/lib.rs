//! # Session — per-server connection and region handle
//!
//! A session binds a client to one storage server: the control connection the
//! server holds open for the lifetime of the session, plus the attached
//! region the server published over it. The pool owns one session per live
//! server and is built once at client construction; a server that cannot be
//! reached at that point is marked down in the placement mapper and simply
//! never appears in a replica set.
//!
//! Teardown is strict by design: a leaked session pins the server's region
//! registration (and, on real persistent memory, its pages), so
//! [`SessionPool::close`] propagates the first error instead of shrugging.
//! Dropping an unclosed pool still disconnects best-effort.

use placement::{Mapper, ServerId};
use proto::{recv_frame, send_frame, ProtoError, RpcError, SessionRequest, SessionResponse};
use rmem::{MappedRegion, RegionDescriptor, RmemError};
use slot::SLOT_LEN;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Rmem(#[from] RmemError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("no server session could be established")]
    NoSessions,

    #[error("unexpected response during session handshake")]
    UnexpectedResponse,
}

/// Where an operation goes: a borrowed region plus the capability and the
/// remote address to hit.
#[derive(Clone, Copy)]
pub struct Target<'a> {
    pub region: &'a MappedRegion,
    pub rkey: u32,
    pub addr: u64,
}

/// One connected server: control channel + attached region.
pub struct Session {
    pub server_id: ServerId,
    client_id: u32,
    ctrl: TcpStream,
    pub region: MappedRegion,
    pub descriptor: RegionDescriptor,
    closed: bool,
}

impl Session {
    fn open(
        server_id: ServerId,
        addr: &str,
        client_id: u32,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let sa = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "unresolvable address"))?;
        let mut ctrl = TcpStream::connect_timeout(&sa, timeout)?;
        ctrl.set_read_timeout(Some(timeout))?;
        ctrl.set_write_timeout(Some(timeout))?;

        send_frame(&mut ctrl, &SessionRequest::Connect { client_id })?;
        let descriptor = match recv_frame(&mut ctrl)? {
            SessionResponse::Region(d) => d,
            SessionResponse::Error(e) => return Err(e.into()),
            SessionResponse::Disconnected => return Err(SessionError::UnexpectedResponse),
        };
        let region = MappedRegion::attach(&descriptor)?;
        debug!(
            server_id,
            base = descriptor.base,
            length = descriptor.length,
            "session established"
        );
        Ok(Self {
            server_id,
            client_id,
            ctrl,
            region,
            descriptor,
            closed: false,
        })
    }

    /// Slots in this server's bucket.
    #[must_use]
    pub fn slot_count(&self) -> u64 {
        self.descriptor.length / SLOT_LEN as u64
    }

    /// Base address of the bucket.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.descriptor.base
    }

    /// Composes an operation target at a remote address.
    #[must_use]
    pub fn target(&self, addr: u64) -> Target<'_> {
        Target {
            region: &self.region,
            rkey: self.descriptor.rkey,
            addr,
        }
    }

    /// Strict disconnect: tells the server, waits for the ack, shuts the
    /// stream down. The region mapping is released on drop.
    fn shutdown(mut self) -> Result<(), SessionError> {
        // Mark first so Drop does not retry a half-done teardown.
        self.closed = true;
        send_frame(
            &mut self.ctrl,
            &SessionRequest::Disconnect {
                client_id: self.client_id,
            },
        )?;
        match recv_frame(&mut self.ctrl)? {
            SessionResponse::Disconnected => {}
            SessionResponse::Error(e) => return Err(e.into()),
            SessionResponse::Region(_) => return Err(SessionError::UnexpectedResponse),
        }
        self.ctrl.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            let _ = send_frame(
                &mut self.ctrl,
                &SessionRequest::Disconnect {
                    client_id: self.client_id,
                },
            );
            let _ = self.ctrl.shutdown(Shutdown::Both);
        }
    }
}

/// All sessions of one client, keyed by server id.
pub struct SessionPool {
    client_id: u32,
    sessions: HashMap<ServerId, Session>,
}

impl SessionPool {
    /// Connects to every `Up` server in the mapper. A server that fails the
    /// handshake is marked down and skipped.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoSessions`] when not a single server could be
    /// connected.
    pub fn connect(
        client_id: u32,
        mapper: &mut Mapper,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let targets: Vec<(ServerId, String)> = mapper
            .servers()
            .iter()
            .filter(|s| s.status == placement::ServerStatus::Up)
            .map(|s| (s.id, s.addr.clone()))
            .collect();

        let mut sessions = HashMap::new();
        for (id, addr) in targets {
            match Session::open(id, &addr, client_id, timeout) {
                Ok(s) => {
                    sessions.insert(id, s);
                }
                Err(e) => {
                    warn!(server_id = id, %addr, error = %e, "marking server down");
                    mapper.mark_down(id);
                }
            }
        }

        if sessions.is_empty() {
            return Err(SessionError::NoSessions);
        }
        info!(client_id, sessions = sessions.len(), "session pool ready");
        Ok(Self {
            client_id,
            sessions,
        })
    }

    #[must_use]
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    #[must_use]
    pub fn session(&self, id: ServerId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Connected server ids, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<ServerId> {
        let mut ids: Vec<ServerId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Removes one session (best-effort disconnect). Used when a server
    /// fails mid-operation.
    pub fn drop_session(&mut self, id: ServerId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    /// Strict teardown of every session. The first error propagates after
    /// every session has been attempted.
    pub fn close(mut self) -> Result<(), SessionError> {
        let mut first_err = None;
        for (_, session) in self.sessions.drain() {
            if let Err(e) = session.shutdown() {
                warn!(error = %e, "session teardown failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
