//! Session registry and signaling state machine
//!
//! The [`Router`] is the state owned by the task loop. Signaling connections
//! and transport engines reach it only by enqueuing tasks, so nothing in here
//! needs a lock.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::model::envelope::{Inbound, Outbound};
use crate::model::participant::Participant;
use crate::model::room::Room;
use crate::model::session::{
    ConnectionId, RoomId, Session, SessionId, SessionState, SignalingSink,
};
use crate::task_loop::TaskHandle;
use crate::transport::{
    ConnectionState, EventSink, LocalCandidate, SdpKind, TransportEngine, TransportEvent,
};
use crate::util::candidate_allowed;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Send `{"type":"hello"}` with the assigned id when a connection opens.
    pub send_hello: bool,
    /// Forward IPv6 local candidates to clients.
    pub allow_ipv6: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            send_hello: true,
            allow_ipv6: false,
        }
    }
}

pub struct Router {
    config: RouterConfig,
    engine: Arc<dyn TransportEngine>,
    tasks: TaskHandle<Router>,
    next_session: u64,
    sessions: HashMap<SessionId, Session>,
    connections: HashMap<ConnectionId, SessionId>,
    rooms: HashMap<RoomId, Room>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        engine: Arc<dyn TransportEngine>,
        tasks: TaskHandle<Router>,
    ) -> Self {
        Router {
            config,
            engine,
            tasks,
            next_session: 1,
            sessions: HashMap::new(),
            connections: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_for(&self, conn: ConnectionId) -> Option<&Session> {
        self.connections.get(&conn).and_then(|id| self.sessions.get(id))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn on_connection_open(&mut self, conn: ConnectionId, signaling: Arc<dyn SignalingSink>) {
        if let Some(existing) = self.connections.get(&conn) {
            warn!(%conn, session = %existing, "Connection opened twice, ignoring");
            return;
        }

        let id = SessionId::new(self.next_session);
        self.next_session += 1;

        let session = Session::new(id, conn, signaling);
        info!(session = %id, %conn, "Signaling connected");

        if self.config.send_hello {
            session.send(&Outbound::Hello { id: id.to_string() });
        }

        self.connections.insert(conn, id);
        self.sessions.insert(id, session);
    }

    pub fn on_connection_closed(&mut self, conn: ConnectionId) {
        let Some(id) = self.connections.remove(&conn) else {
            debug!(%conn, "Close for unknown connection");
            return;
        };
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        session.state = SessionState::Closed;
        info!(session = %id, "Signaling disconnected");

        if let Some(room_id) = session.room.take() {
            self.leave_room(&room_id, id);
        }
        if let Some(transport) = session.transport.take() {
            transport.close();
        }
    }

    pub fn on_message(&mut self, conn: ConnectionId, text: &str) {
        let Some(&id) = self.connections.get(&conn) else {
            warn!(%conn, "Signaling message for unknown connection");
            return;
        };

        let envelope = match Inbound::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(session = %id, "Dropping signaling message: {}", e);
                return;
            }
        };
        debug!(session = %id, kind = envelope.kind(), "Received signaling");

        match envelope {
            Inbound::Offer { sdp, room_id } => self.handle_offer(id, &sdp, RoomId::new(room_id)),
            Inbound::Answer { sdp } => self.handle_answer(id, &sdp),
            Inbound::Candidate { candidate, sdp_mid } => {
                self.handle_remote_candidate(id, &candidate, sdp_mid.as_deref())
            }
            Inbound::EndOfCandidates => {
                debug!(session = %id, "Client finished sending candidates");
            }
            Inbound::Ping => {
                if let Some(session) = self.sessions.get(&id) {
                    session.send(&Outbound::Pong);
                }
            }
        }
    }

    fn handle_offer(&mut self, id: SessionId, sdp: &str, room_id: RoomId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };

        let transport = match session.transport.clone() {
            Some(transport) => {
                if session.room.as_ref() != Some(&room_id) {
                    debug!(session = %id, room = %room_id, "Room is fixed by the first offer, ignoring");
                }
                transport
            }
            None => {
                session.generation += 1;
                let events = event_sink(&self.tasks, id, session.generation);
                let transport = match self.engine.create_session(id, events) {
                    Ok(transport) => transport,
                    Err(e) => {
                        error!(session = %id, "Failed to create transport: {}", e);
                        return;
                    }
                };
                info!(session = %id, room = %room_id, "Created transport");

                session.transport = Some(Arc::clone(&transport));
                session.room = Some(room_id.clone());
                session.state = SessionState::Negotiating;

                let participant = Participant::new(id, Arc::clone(&transport));
                self.rooms
                    .entry(room_id.clone())
                    .or_insert_with(|| Room::new(room_id))
                    .add_participant(participant);
                transport
            }
        };

        if let Err(e) = transport.set_remote_description(sdp, SdpKind::Offer) {
            warn!(session = %id, "Failed to apply offer: {}", e);
            return;
        }
        if let Err(e) = transport.set_local_description() {
            warn!(session = %id, "Failed to request answer: {}", e);
        }
    }

    fn handle_answer(&mut self, id: SessionId, sdp: &str) {
        let Some(transport) = self.sessions.get(&id).and_then(|s| s.transport.as_ref()) else {
            warn!(session = %id, "Answer before any offer, dropping");
            return;
        };
        if let Err(e) = transport.set_remote_description(sdp, SdpKind::Answer) {
            warn!(session = %id, "Failed to apply answer: {}", e);
        }
    }

    fn handle_remote_candidate(&mut self, id: SessionId, candidate: &str, mid: Option<&str>) {
        if candidate.is_empty() {
            debug!(session = %id, "Skipping empty candidate");
            return;
        }
        let Some(transport) = self.sessions.get(&id).and_then(|s| s.transport.as_ref()) else {
            warn!(session = %id, "Candidate before offer, dropping");
            return;
        };
        match transport.add_remote_candidate(candidate, mid) {
            Ok(()) => debug!(session = %id, candidate, "Added remote candidate"),
            Err(e) => warn!(session = %id, "Failed to add candidate: {}", e),
        }
    }

    /// Handle an event reported by the transport created as `generation` of
    /// session `id`. Events from a transport that has since been replaced or
    /// dropped are ignored.
    pub fn on_transport_event(&mut self, id: SessionId, generation: u64, event: TransportEvent) {
        let Some(session) = self.sessions.get_mut(&id) else {
            debug!(session = %id, ?event, "Transport event for closed session");
            return;
        };
        if session.generation != generation || session.transport.is_none() {
            debug!(session = %id, generation, ?event, "Event from a stale transport");
            return;
        }

        match event {
            TransportEvent::LocalDescription { kind, sdp } => {
                let envelope = match kind {
                    SdpKind::Answer => Outbound::Answer { sdp },
                    SdpKind::Offer => Outbound::Offer { sdp },
                };
                debug!(session = %id, kind = envelope.kind(), "Sending local description");
                session.send(&envelope);
            }
            TransportEvent::LocalCandidate(Some(candidate)) => {
                self.send_local_candidate(id, candidate);
            }
            TransportEvent::LocalCandidate(None) => {
                session.send(&Outbound::EndOfCandidates);
            }
            TransportEvent::ChannelOpened(channel) => {
                info!(session = %id, label = channel.label(), "Data channel opened");
                match self.participant_mut(id) {
                    Some(participant) => participant.attach_channel(channel),
                    None => {
                        warn!(session = %id, "Data channel for session outside any room");
                        channel.close();
                    }
                }
            }
            TransportEvent::ContentOpened(content) => {
                let Some(room) = session.room.as_ref().and_then(|r| self.rooms.get_mut(r)) else {
                    warn!(session = %id, "Content for session outside any room");
                    content.close();
                    return;
                };
                if let Err(e) = room.handle_content_published(id, content) {
                    warn!(session = %id, "Rejected published content: {}", e);
                }
            }
            TransportEvent::ChannelMessage(payload) => {
                match session.room.as_ref().and_then(|r| self.rooms.get(r)) {
                    Some(room) => {
                        room.broadcast(id, &payload);
                    }
                    None => debug!(session = %id, "Channel message outside any room"),
                }
            }
            TransportEvent::StateChanged(state) => self.handle_state_change(id, state),
        }
    }

    fn handle_state_change(&mut self, id: SessionId, state: ConnectionState) {
        let previous = self.participant_mut(id).map(|p| p.state());
        info!(session = %id, ?previous, ?state, "Transport state changed");

        match state {
            ConnectionState::Failed | ConnectionState::Closed => self.reset_transport(id),
            _ => {
                if state == ConnectionState::Connected {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.state = SessionState::Active;
                    }
                }
                if let Some(participant) = self.participant_mut(id) {
                    participant.set_state(state);
                    participant.request_renegotiation();
                }
            }
        }
    }

    /// Forget a transport that died on its own. The signaling connection
    /// stays up; the next offer creates a new transport and joins again.
    fn reset_transport(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let room = session.room.take();
        let transport = session.transport.take();
        session.state = SessionState::New;
        warn!(session = %id, "Transport lost, waiting for a new offer");

        if let Some(room_id) = room {
            self.leave_room(&room_id, id);
        }
        if let Some(transport) = transport {
            transport.close();
        }
    }

    fn send_local_candidate(&self, id: SessionId, candidate: LocalCandidate) {
        let Some(session) = self.sessions.get(&id) else {
            return;
        };
        if !candidate_allowed(&candidate.candidate, self.config.allow_ipv6) {
            debug!(session = %id, candidate = %candidate.candidate, "Skipping local candidate");
            return;
        }
        debug!(session = %id, candidate = %candidate.candidate, "Sending local candidate");
        session.send(&Outbound::Candidate {
            candidate: candidate.candidate,
            sdp_mid: candidate.mid.filter(|m| !m.is_empty()),
        });
    }

    fn participant_mut(&mut self, id: SessionId) -> Option<&mut Participant> {
        let room = self.sessions.get(&id)?.room.as_ref()?;
        self.rooms.get_mut(room)?.participant_mut(id)
    }

    fn leave_room(&mut self, room_id: &RoomId, id: SessionId) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        room.remove_participant(id);
        if room.is_empty() {
            info!(room = %room_id, "Room empty, removing");
            self.rooms.remove(room_id);
        }
    }
}

/// Build the sink an engine uses to report events for one transport of `id`.
/// Every event is re-enqueued onto the task loop before it touches any state.
fn event_sink(tasks: &TaskHandle<Router>, id: SessionId, generation: u64) -> EventSink {
    let tasks = tasks.clone();
    EventSink::new(move |event| {
        tasks.enqueue(move |router: &mut Router| {
            router.on_transport_event(id, generation, event)
        });
    })
}
