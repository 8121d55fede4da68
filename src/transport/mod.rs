//! Transport engine seam
//!
//! The core never performs ICE, DTLS or SDP work itself. It drives an engine
//! through the traits below and receives the engine's callbacks as
//! [`TransportEvent`]s pushed through an [`EventSink`]. Engines may call the
//! sink from any thread.

use std::fmt;
use std::sync::Arc;

use crate::error::TransportError;
use crate::model::session::SessionId;

pub mod rtc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Audio,
    Video,
}

/// What a relay leg needs to know to carry a piece of published content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescription {
    /// The session that publishes the content.
    pub origin: SessionId,
    pub kind: ContentKind,
    /// Engine-specific identifier of the track inside the origin's transport.
    pub track: String,
}

/// A local ICE candidate ready to be signaled to the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCandidate {
    pub candidate: String,
    pub mid: Option<String>,
}

/// An application message carried on a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn from_bytes(binary: bool, data: Vec<u8>) -> Payload {
        if binary {
            return Payload::Binary(data);
        }
        match String::from_utf8(data) {
            Ok(text) => Payload::Text(text),
            Err(e) => Payload::Binary(e.into_bytes()),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b,
        }
    }
}

/// Creates one transport handle per session.
pub trait TransportEngine: Send + Sync {
    fn create_session(
        &self,
        session: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// A session's transport handle.
pub trait Transport: Send + Sync {
    fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> Result<(), TransportError>;

    /// Ask the engine to produce a local description. The result arrives later
    /// as [`TransportEvent::LocalDescription`].
    fn set_local_description(&self) -> Result<(), TransportError>;

    fn add_remote_candidate(&self, candidate: &str, mid: Option<&str>) -> Result<(), TransportError>;

    /// Add an outgoing conduit on this transport that carries `content`.
    fn add_outbound_leg(
        &self,
        content: &ContentDescription,
    ) -> Result<Box<dyn RelayLeg>, TransportError>;

    fn close(&self);
}

/// An outgoing conduit carrying one participant's content to one peer.
pub trait RelayLeg: fmt::Debug + Send {
    fn close(&self);
}

/// Content a remote peer publishes into its transport.
pub trait PublishedContent: fmt::Debug + Send + Sync {
    fn description(&self) -> &ContentDescription;
    fn close(&self);
}

/// Logical message channel opened by a remote peer.
pub trait DataChannel: fmt::Debug + Send + Sync {
    fn label(&self) -> &str;
    fn is_open(&self) -> bool;
    fn send(&self, payload: &Payload) -> Result<(), TransportError>;
    fn close(&self);
}

/// Callbacks from an engine, tagged by kind.
#[derive(Debug)]
pub enum TransportEvent {
    LocalDescription { kind: SdpKind, sdp: String },
    /// `None` marks the end of local candidate gathering.
    LocalCandidate(Option<LocalCandidate>),
    ChannelOpened(Arc<dyn DataChannel>),
    ContentOpened(Arc<dyn PublishedContent>),
    ChannelMessage(Payload),
    StateChanged(ConnectionState),
}

/// Where an engine delivers the events of one session.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// A sink that discards everything.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.deliver)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}
