//! # Proto — control-plane wire protocol
//!
//! The control plane is deliberately small: a client talks to the monitor
//! once at startup to learn the server list, and to each server once per
//! session to obtain the region descriptor. Everything after that is
//! one-sided data-plane traffic that never touches these types.
//!
//! Frames are length-prefixed bincode over a byte stream:
//!
//! ```text
//! [len: u32 LE][bincode(message) ...]
//! ```
//!
//! `len` counts the body only. Frames are capped well below anything a
//! control message legitimately needs, so a corrupt or hostile peer cannot
//! make a servicer allocate unbounded memory.

use rmem::RegionDescriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;

/// Upper bound on one control frame's body.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame too large: {0} bytes (max {MAX_FRAME_LEN})")]
    FrameTooLarge(usize),
}

/// Error a servicer sends back instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcErrorKind {
    AlreadyExists,
    InvalidArgument,
    Internal,
}

/// One entry of the monitor's server listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: u32,
    pub addr: String,
}

/// Requests accepted by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorRequest {
    /// Registers a storage server. `id = 0` asks the monitor to assign one.
    AddServer { id: u32, addr: String },
    /// Fetches the full server listing, ordered by id.
    GetServers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorResponse {
    ServerAdded { id: u32 },
    Servers(Vec<ServerInfo>),
    Error(RpcError),
}

/// Requests accepted by a storage server's session servicer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRequest {
    /// Opens a session. The server answers with its region descriptor and
    /// then holds the connection open until `Disconnect` or stream close.
    Connect { client_id: u32 },
    Disconnect { client_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResponse {
    Region(RegionDescriptor),
    Disconnected,
    Error(RpcError),
}

/// Writes one length-prefixed frame.
pub fn send_frame<W: Write, T: Serialize>(w: &mut W, msg: &T) -> Result<(), ProtoError> {
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(body.len()));
    }
    w.write_all(&(body.len() as u32).to_le_bytes())?;
    w.write_all(&body)?;
    w.flush()?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// A clean EOF before the length prefix surfaces as
/// `ProtoError::Io(UnexpectedEof)`; callers treating peer close as a normal
/// end of session match on that.
pub fn recv_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T, ProtoError> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Ok(bincode::deserialize(&body)?)
}
