//! Room-scoped bookkeeping for one session
//!
//! A participant owns the relay legs that carry its own published content to
//! every other member. It also remembers which members relay their content to
//! it, so both ends of every leg are visible from the room.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::RoomError;
use crate::model::session::SessionId;
use crate::transport::{ConnectionState, DataChannel, PublishedContent, RelayLeg, Transport};

pub struct Participant {
    id: SessionId,
    transport: Arc<dyn Transport>,
    state: ConnectionState,
    channel: Option<Arc<dyn DataChannel>>,
    content: Option<Arc<dyn PublishedContent>>,
    /// Legs carrying this participant's content, keyed by receiving peer.
    relay_legs: BTreeMap<SessionId, Box<dyn RelayLeg>>,
    /// Peers whose content is relayed to this participant.
    inbound: BTreeSet<SessionId>,
}

impl Participant {
    pub fn new(id: SessionId, transport: Arc<dyn Transport>) -> Self {
        Participant {
            id,
            transport,
            state: ConnectionState::New,
            channel: None,
            content: None,
            relay_legs: BTreeMap::new(),
            inbound: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn content(&self) -> Option<&Arc<dyn PublishedContent>> {
        self.content.as_ref()
    }

    pub fn is_publishing(&self) -> bool {
        self.content.is_some()
    }

    /// Bind published content. A participant publishes at most once.
    pub fn publish(&mut self, content: Arc<dyn PublishedContent>) -> Result<(), RoomError> {
        if self.content.is_some() {
            return Err(RoomError::AlreadyPublishing(self.id));
        }
        self.content = Some(content);
        Ok(())
    }

    /// Attach the data channel, closing any channel attached before.
    pub fn attach_channel(&mut self, channel: Arc<dyn DataChannel>) {
        if let Some(previous) = self.channel.replace(channel) {
            debug!(session = %self.id, label = previous.label(), "Replacing data channel");
            previous.close();
        }
    }

    pub fn channel(&self) -> Option<&Arc<dyn DataChannel>> {
        self.channel.as_ref()
    }

    pub fn channel_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    pub fn add_relay_leg(&mut self, peer: SessionId, leg: Box<dyn RelayLeg>) {
        if let Some(stale) = self.relay_legs.insert(peer, leg) {
            warn!(session = %self.id, %peer, "Replaced existing relay leg");
            stale.close();
        }
    }

    /// Remove and close the leg toward `peer`. Returns false if there was none.
    pub fn remove_relay_leg(&mut self, peer: SessionId) -> bool {
        match self.relay_legs.remove(&peer) {
            Some(leg) => {
                leg.close();
                true
            }
            None => false,
        }
    }

    pub fn relay_targets(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.relay_legs.keys().copied()
    }

    pub fn relays_to(&self, peer: SessionId) -> bool {
        self.relay_legs.contains_key(&peer)
    }

    pub(crate) fn add_inbound(&mut self, source: SessionId) {
        self.inbound.insert(source);
    }

    pub(crate) fn remove_inbound(&mut self, source: SessionId) {
        self.inbound.remove(&source);
    }

    pub fn inbound_sources(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.inbound.iter().copied()
    }

    /// Regenerate the local description so pending relay legs get negotiated.
    ///
    /// Does nothing until the transport has reported a connected state.
    pub fn request_renegotiation(&self) {
        if self.state != ConnectionState::Connected {
            debug!(session = %self.id, state = ?self.state, "Renegotiation deferred until connected");
            return;
        }
        if let Err(e) = self.transport.set_local_description() {
            warn!(session = %self.id, "Renegotiation failed: {}", e);
        }
    }

    /// Tear down everything this participant owns except the transport
    /// itself, which belongs to the session.
    pub fn close(&mut self) {
        for (_, leg) in std::mem::take(&mut self.relay_legs) {
            leg.close();
        }
        if let Some(content) = self.content.take() {
            content.close();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.inbound.clear();
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("publishing", &self.content.is_some())
            .field("channel_open", &self.channel_open())
            .field("relay_legs", &self.relay_legs.keys().collect::<Vec<_>>())
            .field("inbound", &self.inbound)
            .finish()
    }
}
