//! Event propagation between clients
//!
//! Media data and keyframe requests cross from one client's Rtc to others
//! inside the driver thread without ever touching the task loop.

use std::time::Instant;

use str0m::media::{KeyframeRequest, MediaData, Mid};

use crate::model::session::SessionId;

#[allow(clippy::large_enum_variant)]
pub enum Propagated {
    /// When we have nothing to propagate.
    Noop,

    /// A poll operation has reached its timeout.
    Timeout(Instant),

    /// Media data from a published track, to be written to every relay leg
    /// carrying it.
    MediaData(SessionId, MediaData),

    /// A keyframe request from a receiving client, routed to the origin of
    /// the track (origin session, source mid).
    KeyframeRequest(SessionId, KeyframeRequest, SessionId, Mid),
}

impl Propagated {
    /// The client the event came from, if it is client-specific at all.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Propagated::MediaData(s, _) | Propagated::KeyframeRequest(s, _, _, _) => Some(*s),
            _ => None,
        }
    }
}
