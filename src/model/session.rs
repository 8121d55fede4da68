//! Signaling sessions
//!
//! A session is one signaling connection plus the transport handle created
//! for it on its first offer.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::warn;

use crate::error::SignalingError;
use crate::model::envelope::Outbound;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Deref for SessionId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Externally chosen name of a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a signaling connection, assigned by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection open, no offer seen yet.
    New,
    /// Transport created, waiting for it to connect.
    Negotiating,
    /// Transport reported connected.
    Active,
    /// Connection closed; the session is being torn down.
    Closed,
}

/// Write side of a signaling connection.
///
/// Implementations must not block; the task loop calls this directly.
pub trait SignalingSink: Send + Sync {
    fn send_text(&self, text: String) -> Result<(), SignalingError>;
}

pub struct Session {
    pub id: SessionId,
    pub connection: ConnectionId,
    pub state: SessionState,
    pub room: Option<RoomId>,
    pub transport: Option<Arc<dyn Transport>>,
    /// Bumped every time a transport is created, so events from an earlier
    /// one can be told apart.
    pub generation: u64,
    signaling: Arc<dyn SignalingSink>,
}

impl Session {
    pub fn new(id: SessionId, connection: ConnectionId, signaling: Arc<dyn SignalingSink>) -> Self {
        Session {
            id,
            connection,
            state: SessionState::New,
            room: None,
            transport: None,
            generation: 0,
            signaling,
        }
    }

    /// Encode and send an envelope. Failures are logged, never returned.
    pub fn send(&self, envelope: &Outbound) {
        let result = envelope
            .encode()
            .map_err(SignalingError::from)
            .and_then(|text| self.signaling.send_text(text));

        if let Err(e) = result {
            warn!(session = %self.id, kind = envelope.kind(), "Failed to send envelope: {}", e);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("state", &self.state)
            .field("room", &self.room)
            .field("has_transport", &self.transport.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}
