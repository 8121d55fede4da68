//! Error types
//!
//! None of these ever reach a remote peer. They are logged where they occur
//! and the offending input is dropped.

use thiserror::Error;

use crate::model::session::SessionId;

/// Failures reported by a transport engine or one of its handles.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The engine driver is gone and no longer accepts commands.
    #[error("transport engine stopped")]
    EngineStopped,

    /// A session description could not be parsed or applied.
    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    /// A remote candidate could not be parsed.
    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    /// The content referenced by a relay leg cannot be carried.
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    /// The data channel is not open.
    #[error("data channel closed")]
    ChannelClosed,
}

/// Failures writing to a signaling connection.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling connection closed")]
    ConnectionClosed,

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reasons an inbound signaling payload is dropped.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("not valid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("missing \"type\" field")]
    MissingType,

    #[error("unknown envelope type {0:?}")]
    UnknownType(String),

    #[error("malformed {kind:?} envelope: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Room membership and publishing rule violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("session {0} is not a member of the room")]
    UnknownParticipant(SessionId),

    #[error("session {0} already publishes content")]
    AlreadyPublishing(SessionId),
}
