//! Room membership and fan-out
//!
//! Membership drives both data channel broadcast and the relay mesh: every
//! member that publishes content has one relay leg toward every other member.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::RoomError;
use crate::model::participant::Participant;
use crate::model::session::{RoomId, SessionId};
use crate::transport::{Payload, PublishedContent};

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    participants: BTreeMap<SessionId, Participant>,
}

impl Room {
    pub fn new(id: RoomId) -> Self {
        Room {
            id,
            participants: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn participant(&self, id: SessionId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn participant_mut(&mut self, id: SessionId) -> Option<&mut Participant> {
        self.participants.get_mut(&id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Wire every existing publisher toward the newcomer, then insert it.
    ///
    /// The newcomer only becomes visible to other operations once all of its
    /// inbound legs exist.
    pub fn add_participant(&mut self, mut participant: Participant) {
        let id = participant.id();
        if self.contains(id) {
            warn!(room = %self.id, session = %id, "Participant rejoined, dropping old entry");
            self.remove_participant(id);
        }

        let mut wired = 0;
        for member in self.participants.values_mut() {
            let Some(content) = member.content() else {
                continue;
            };
            match participant.transport().add_outbound_leg(content.description()) {
                Ok(leg) => {
                    member.add_relay_leg(id, leg);
                    participant.add_inbound(member.id());
                    wired += 1;
                }
                Err(e) => {
                    warn!(room = %self.id, session = %id, peer = %member.id(), "Failed to add relay leg: {}", e);
                }
            }
        }

        if wired > 0 {
            participant.request_renegotiation();
        }

        info!(room = %self.id, session = %id, wired, members = self.participants.len() + 1, "Participant joined");
        self.participants.insert(id, participant);
    }

    /// Bind content to `id` and relay it to every other member.
    ///
    /// Rejected content is closed before the error is returned.
    pub fn handle_content_published(
        &mut self,
        id: SessionId,
        content: Arc<dyn PublishedContent>,
    ) -> Result<(), RoomError> {
        let Some(publisher) = self.participants.get_mut(&id) else {
            content.close();
            return Err(RoomError::UnknownParticipant(id));
        };
        if let Err(e) = publisher.publish(Arc::clone(&content)) {
            content.close();
            return Err(e);
        }

        let description = content.description();
        let mut legs = Vec::new();
        for (peer, member) in self.participants.iter_mut() {
            if *peer == id {
                continue;
            }
            match member.transport().add_outbound_leg(description) {
                Ok(leg) => {
                    member.add_inbound(id);
                    member.request_renegotiation();
                    legs.push((*peer, leg));
                }
                Err(e) => {
                    warn!(room = %self.id, session = %id, %peer, "Failed to add relay leg: {}", e);
                }
            }
        }

        info!(room = %self.id, session = %id, kind = ?description.kind, peers = legs.len(), "Content published");

        if let Some(publisher) = self.participants.get_mut(&id) {
            for (peer, leg) in legs {
                publisher.add_relay_leg(peer, leg);
            }
        }
        Ok(())
    }

    /// Remove `id` and tear down every leg it is part of.
    pub fn remove_participant(&mut self, id: SessionId) -> Option<Participant> {
        let mut departed = self.participants.remove(&id)?;

        for member in self.participants.values_mut() {
            member.remove_relay_leg(id);
            member.remove_inbound(id);
        }
        let receivers: Vec<SessionId> = departed.relay_targets().collect();
        departed.close();

        // Closed legs keep their m-line until the receiver renegotiates.
        for receiver in receivers {
            if let Some(member) = self.participants.get(&receiver) {
                member.request_renegotiation();
            }
        }

        info!(room = %self.id, session = %id, members = self.participants.len(), "Participant left");
        Some(departed)
    }

    /// Best-effort delivery of `payload` to every other member with an open
    /// channel. Returns the number of successful deliveries.
    pub fn broadcast(&self, from: SessionId, payload: &Payload) -> usize {
        let mut delivered = 0;
        for (id, member) in &self.participants {
            if *id == from {
                continue;
            }
            let Some(channel) = member.channel().filter(|c| c.is_open()) else {
                continue;
            };
            match channel.send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(room = %self.id, from = %from, to = %id, "Failed to deliver message: {}", e),
            }
        }
        debug!(room = %self.id, from = %from, delivered, "Broadcast");
        delivered
    }
}
