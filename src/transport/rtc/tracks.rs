//! Media track management
//!
//! Incoming tracks are content a client publishes. Outgoing tracks are relay
//! legs: each one carries exactly one incoming track of another client.

use std::time::Instant;

use str0m::media::{MediaKind, Mid, Rid};

use crate::model::session::SessionId;
use crate::transport::ContentKind;

/// Identifier of a relay leg, unique within one engine.
pub type LegId = u64;

/// An incoming media track published by the remote peer.
#[derive(Debug)]
pub struct TrackIn {
    /// The media ID (Mid) assigned to this track
    pub(crate) mid: Mid,
    /// The kind of media (audio or video)
    pub(crate) kind: MediaKind,
    /// Cleared once the published content is closed; media is then dropped.
    pub(crate) open: bool,
    /// Timestamp of the last keyframe request for this track
    pub(crate) last_keyframe_request: Option<Instant>,
}

/// An outgoing media track carrying another client's content.
#[derive(Debug)]
pub struct TrackOut {
    pub(crate) leg: LegId,
    /// The client that publishes the source track
    pub(crate) origin: SessionId,
    /// Mid of the source track inside the origin's Rtc
    pub(crate) source_mid: Mid,
    pub(crate) kind: MediaKind,
    /// Current state of the outgoing track
    pub(crate) state: TrackOutState,
    /// Simulcast layer last relayed on this leg, used for keyframe requests.
    pub(crate) rid: Option<Rid>,
}

/// The negotiation state of an outgoing track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutState {
    /// Track needs to be opened in the next SDP negotiation
    ToOpen,
    /// Track negotiation is in progress with the given Mid
    Negotiating(Mid),
    /// Track is fully negotiated and open for media transmission
    Open(Mid),
    /// Leg closed; the m-line must be made inactive in the next offer
    Closing(Mid),
    /// Inactive m-line offered, dropped once the answer arrives
    Retiring(Mid),
}

impl TrackOut {
    pub fn new(leg: LegId, origin: SessionId, source_mid: Mid, kind: MediaKind) -> TrackOut {
        TrackOut {
            leg,
            origin,
            source_mid,
            kind,
            state: TrackOutState::ToOpen,
            rid: None,
        }
    }

    /// The m-line media can be written to.
    pub fn open_mid(&self) -> Option<Mid> {
        match self.state {
            TrackOutState::Open(m) => Some(m),
            _ => None,
        }
    }

    /// Mark the leg closed. Returns false if it never got an m-line and can
    /// be dropped right away.
    pub fn close(&mut self) -> bool {
        match self.state {
            TrackOutState::ToOpen => false,
            TrackOutState::Negotiating(m) | TrackOutState::Open(m) => {
                self.state = TrackOutState::Closing(m);
                true
            }
            TrackOutState::Closing(_) | TrackOutState::Retiring(_) => true,
        }
    }

    /// Whether this leg carries media from `origin`'s track `mid`.
    pub fn carries(&self, origin: SessionId, mid: Mid) -> bool {
        self.origin == origin && self.source_mid == mid
    }
}

pub fn content_kind(kind: MediaKind) -> ContentKind {
    match kind {
        MediaKind::Audio => ContentKind::Audio,
        MediaKind::Video => ContentKind::Video,
    }
}

pub fn media_kind(kind: ContentKind) -> MediaKind {
    match kind {
        ContentKind::Audio => MediaKind::Audio,
        ContentKind::Video => MediaKind::Video,
    }
}
