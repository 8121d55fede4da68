use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use str0m::change::{SdpAnswer, SdpPendingOffer};
use str0m::channel::{ChannelData, ChannelId};
use str0m::media::{
    Direction, KeyframeRequest, KeyframeRequestKind, MediaAdded, MediaData, MediaKind, Mid, Rid,
};
use str0m::{Candidate, Event, IceConnectionState, Input, Output, Rtc};
use tracing::{debug, info, warn};

use crate::model::session::SessionId;
use crate::transport::rtc::handle::{RtcChannel, RtcContent};
use crate::transport::rtc::propagated::Propagated;
use crate::transport::rtc::tracks::{content_kind, LegId, TrackIn, TrackOut, TrackOutState};
use crate::transport::rtc::{Command, RemoteDescription};
use crate::transport::{
    ConnectionState, ContentDescription, EventSink, LocalCandidate, Payload, SdpKind,
    TransportEvent,
};

/// Driver-side state of one session's Rtc.
pub struct Client {
    pub session: SessionId,
    pub rtc: Rtc,
    events: EventSink,
    commands: Sender<Command>,
    local_candidates: Vec<Candidate>,
    candidates_signaled: bool,
    /// Answer produced by the last remote offer, emitted on request.
    answer: Option<SdpAnswer>,
    pending: Option<SdpPendingOffer>,
    channel: Option<(ChannelId, Arc<AtomicBool>)>,
    tracks_in: Vec<TrackIn>,
    tracks_out: Vec<TrackOut>,
    closed_reported: bool,
}

impl Client {
    pub fn new(
        session: SessionId,
        rtc: Rtc,
        events: EventSink,
        commands: Sender<Command>,
        local_candidates: Vec<Candidate>,
    ) -> Client {
        Client {
            session,
            rtc,
            events,
            commands,
            local_candidates,
            candidates_signaled: false,
            answer: None,
            pending: None,
            channel: None,
            tracks_in: vec![],
            tracks_out: vec![],
            closed_reported: false,
        }
    }

    pub fn accepts(&self, input: &Input) -> bool {
        self.rtc.accepts(input)
    }

    /// Report the end of this client once its Rtc is gone. Returns whether
    /// the client should be kept.
    pub fn retain(&mut self) -> bool {
        if self.rtc.is_alive() {
            return true;
        }
        if !self.closed_reported {
            self.closed_reported = true;
            if let Some((_, open)) = self.channel.take() {
                open.store(false, Ordering::Release);
            }
            self.events
                .emit(TransportEvent::StateChanged(ConnectionState::Closed));
        }
        false
    }

    pub fn handle_input(&mut self, input: Input) {
        if !self.rtc.is_alive() {
            return;
        }

        if let Err(e) = self.rtc.handle_input(input) {
            warn!(session = %self.session, "Client disconnected: {:?}", e);
            self.rtc.disconnect();
        }
    }

    pub fn handle_remote_description(&mut self, description: RemoteDescription) {
        match description {
            RemoteDescription::Offer(offer) => match self.rtc.sdp_api().accept_offer(offer) {
                Ok(answer) => {
                    // An incoming offer supersedes anything we had in flight,
                    // so redo pending negotiation afterwards.
                    self.pending = None;
                    self.settle_legs(false);
                    self.answer = Some(answer);
                }
                Err(e) => warn!(session = %self.session, "Offer rejected: {:?}", e),
            },
            RemoteDescription::Answer(answer) => {
                let Some(pending) = self.pending.take() else {
                    warn!(session = %self.session, "Answer without a pending offer");
                    return;
                };
                let accepted = match self.rtc.sdp_api().accept_answer(pending, answer) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(session = %self.session, "Answer rejected: {:?}", e);
                        false
                    }
                };
                self.settle_legs(accepted);
                // Legs added or closed while the offer was in flight.
                self.negotiate();
            }
        }
    }

    /// Emit the pending answer, or start a renegotiation if relay legs are
    /// waiting for an m-line.
    pub fn handle_local_description(&mut self) {
        let Some(answer) = self.answer.take() else {
            self.negotiate();
            return;
        };

        self.events.emit(TransportEvent::LocalDescription {
            kind: SdpKind::Answer,
            sdp: answer.to_sdp_string(),
        });

        if !self.candidates_signaled {
            self.candidates_signaled = true;
            for candidate in &self.local_candidates {
                self.events
                    .emit(TransportEvent::LocalCandidate(Some(LocalCandidate {
                        candidate: candidate.to_sdp_string(),
                        mid: None,
                    })));
            }
            self.events.emit(TransportEvent::LocalCandidate(None));
        }

        if self.rtc.is_connected() {
            // Legs the remote offer pushed back to ToOpen.
            self.negotiate();
        }
    }

    pub fn add_remote_candidate(&mut self, candidate: Candidate) {
        self.rtc.add_remote_candidate(candidate);
    }

    pub fn add_leg(&mut self, leg: LegId, origin: SessionId, source_mid: Mid, kind: MediaKind) {
        self.tracks_out
            .push(TrackOut::new(leg, origin, source_mid, kind));
    }

    /// Stop relaying on `leg`. A leg with an m-line stays until an offer
    /// marking it inactive has been answered.
    pub fn close_leg(&mut self, leg: LegId) {
        let Some(pos) = self.tracks_out.iter().position(|t| t.leg == leg) else {
            debug!(session = %self.session, leg, "Close for unknown relay leg");
            return;
        };
        if !self.tracks_out[pos].close() {
            self.tracks_out.remove(pos);
        }
    }

    /// Resolve the legs of the offer that just ended, answered or not.
    fn settle_legs(&mut self, answered: bool) {
        self.tracks_out.retain_mut(|track| match track.state {
            TrackOutState::Negotiating(m) => {
                track.state = if answered {
                    TrackOutState::Open(m)
                } else {
                    TrackOutState::ToOpen
                };
                true
            }
            TrackOutState::Retiring(_) => false,
            _ => true,
        });
    }

    pub fn close_content(&mut self, mid: Mid) {
        if let Some(track) = self.tracks_in.iter_mut().find(|t| t.mid == mid) {
            track.open = false;
        }
    }

    pub fn send_channel(&mut self, id: ChannelId, payload: &Payload) {
        let Some(mut channel) = self.rtc.channel(id) else {
            warn!(session = %self.session, "Send on missing data channel");
            return;
        };
        if let Err(e) = channel.write(payload.is_binary(), payload.as_bytes()) {
            warn!(session = %self.session, "Data channel write failed: {:?}", e);
        }
    }

    pub fn close_channel(&mut self, id: ChannelId) {
        if self.channel.as_ref().is_some_and(|(cid, _)| *cid == id) {
            if let Some((_, open)) = self.channel.take() {
                open.store(false, Ordering::Release);
            }
        }
    }

    pub fn poll_output(&mut self, socket: &UdpSocket) -> Propagated {
        if !self.rtc.is_alive() {
            return Propagated::Noop;
        }

        match self.rtc.poll_output() {
            Ok(output) => self.handle_output(output, socket),
            Err(e) => {
                warn!(session = %self.session, "poll_output failed: {:?}", e);
                self.rtc.disconnect();
                Propagated::Noop
            }
        }
    }

    fn handle_output(&mut self, output: Output, socket: &UdpSocket) -> Propagated {
        match output {
            Output::Transmit(transmit) => {
                if let Err(e) = socket.send_to(&transmit.contents, transmit.destination) {
                    debug!(session = %self.session, "UDP send failed: {}", e);
                }
                Propagated::Noop
            }
            Output::Timeout(t) => Propagated::Timeout(t),
            Output::Event(e) => match e {
                Event::Connected => {
                    info!(session = %self.session, "Rtc connected");
                    self.events
                        .emit(TransportEvent::StateChanged(ConnectionState::Connected));
                    Propagated::Noop
                }
                Event::IceConnectionStateChange(v) => {
                    debug!(session = %self.session, "ICE state = {:?}", v);
                    match v {
                        IceConnectionState::Checking => self
                            .events
                            .emit(TransportEvent::StateChanged(ConnectionState::Connecting)),
                        IceConnectionState::Disconnected => {
                            // No ICE restart, the rtc is gone for good.
                            self.events
                                .emit(TransportEvent::StateChanged(ConnectionState::Failed));
                            self.rtc.disconnect();
                        }
                        _ => {}
                    }
                    Propagated::Noop
                }
                Event::MediaAdded(e) => self.handle_media_added(e),
                Event::MediaData(data) => self.handle_media_data_in(data),
                Event::KeyframeRequest(req) => self.handle_incoming_keyframe_req(req),
                Event::ChannelOpen(cid, label) => self.handle_channel_open(cid, label),
                Event::ChannelData(data) => self.handle_channel_data(data),
                Event::ChannelClose(cid) => {
                    debug!(session = %self.session, "Data channel {:?} closed", cid);
                    self.close_channel(cid);
                    Propagated::Noop
                }
                _ => Propagated::Noop,
            },
        }
    }

    fn handle_media_added(&mut self, e: MediaAdded) -> Propagated {
        if !matches!(e.direction, Direction::RecvOnly | Direction::SendRecv) {
            return Propagated::Noop;
        }

        self.tracks_in.push(TrackIn {
            mid: e.mid,
            kind: e.kind,
            open: true,
            last_keyframe_request: None,
        });

        let content = RtcContent {
            description: ContentDescription {
                origin: self.session,
                kind: content_kind(e.kind),
                track: e.mid.to_string(),
            },
            mid: e.mid,
            commands: self.commands.clone(),
        };
        info!(session = %self.session, mid = %e.mid, kind = ?e.kind, "Incoming track");
        self.events
            .emit(TransportEvent::ContentOpened(Arc::new(content)));

        Propagated::Noop
    }

    fn handle_media_data_in(&mut self, data: MediaData) -> Propagated {
        let open = self
            .tracks_in
            .iter()
            .any(|t| t.mid == data.mid && t.open);
        if !open {
            return Propagated::Noop;
        }

        if !data.contiguous {
            self.request_keyframe_throttled(data.mid, data.rid, KeyframeRequestKind::Fir);
        }

        Propagated::MediaData(self.session, data)
    }

    fn request_keyframe_throttled(
        &mut self,
        mid: Mid,
        rid: Option<Rid>,
        kind: KeyframeRequestKind,
    ) {
        let Some(track) = self.tracks_in.iter_mut().find(|t| t.mid == mid) else {
            return;
        };
        if track.kind != MediaKind::Video {
            return;
        }

        if track
            .last_keyframe_request
            .map(|t| t.elapsed() < Duration::from_secs(1))
            .unwrap_or(false)
        {
            return;
        }

        let Some(mut writer) = self.rtc.writer(mid) else {
            return;
        };

        _ = writer.request_keyframe(rid, kind);

        track.last_keyframe_request = Some(Instant::now());
    }

    fn handle_incoming_keyframe_req(&self, mut req: KeyframeRequest) -> Propagated {
        // Find the leg the request arrived on, and through it the source track.
        let Some(track_out) = self
            .tracks_out
            .iter()
            .find(|t| t.open_mid() == Some(req.mid))
        else {
            return Propagated::Noop;
        };

        // The layer this leg relays is the one the origin has to refresh.
        req.rid = track_out.rid;

        Propagated::KeyframeRequest(self.session, req, track_out.origin, track_out.source_mid)
    }

    fn handle_channel_open(&mut self, cid: ChannelId, label: String) -> Propagated {
        info!(session = %self.session, label = %label, "Data channel open");

        let open = Arc::new(AtomicBool::new(true));
        if let Some((_, previous)) = self.channel.replace((cid, Arc::clone(&open))) {
            previous.store(false, Ordering::Release);
        }

        let channel = RtcChannel {
            session: self.session,
            id: cid,
            label,
            open,
            commands: self.commands.clone(),
        };
        self.events
            .emit(TransportEvent::ChannelOpened(Arc::new(channel)));

        Propagated::Noop
    }

    fn handle_channel_data(&mut self, d: ChannelData) -> Propagated {
        if self.channel.as_ref().map(|(cid, _)| *cid) != Some(d.id) {
            debug!(session = %self.session, "Data on secondary channel {:?}, dropping", d.id);
            return Propagated::Noop;
        }
        self.events
            .emit(TransportEvent::ChannelMessage(Payload::from_bytes(d.binary, d.data)));
        Propagated::Noop
    }

    /// Offer m-lines for every relay leg still waiting for one and mark the
    /// m-lines of closed legs inactive.
    fn negotiate(&mut self) {
        if self.pending.is_some() {
            // Picked up again when the answer arrives.
            return;
        }

        // Closed before their m-line was ever accepted.
        let rtc = &self.rtc;
        self.tracks_out.retain(|t| match t.state {
            TrackOutState::Closing(m) => rtc.media(m).is_some(),
            _ => true,
        });

        let mut change = self.rtc.sdp_api();

        for track in &mut self.tracks_out {
            match track.state {
                TrackOutState::ToOpen => {
                    let stream_id = track.origin.to_string();
                    let mid =
                        change.add_media(track.kind, Direction::SendOnly, Some(stream_id), None, None);
                    track.state = TrackOutState::Negotiating(mid);
                }
                TrackOutState::Closing(m) => {
                    change.set_direction(m, Direction::Inactive);
                    track.state = TrackOutState::Retiring(m);
                }
                _ => {}
            }
        }

        if !change.has_changes() {
            // Already inactive, nothing to tell the remote.
            self.tracks_out
                .retain(|t| !matches!(t.state, TrackOutState::Retiring(_)));
            return;
        }

        let Some((offer, pending)) = change.apply() else {
            return;
        };

        self.pending = Some(pending);
        self.events.emit(TransportEvent::LocalDescription {
            kind: SdpKind::Offer,
            sdp: offer.to_sdp_string(),
        });
    }

    pub fn handle_media_data_out(&mut self, origin: SessionId, data: &MediaData) {
        if data.rid.is_some() && data.rid != Some("h".into()) {
            // Simulcast: only the high layer is relayed.
            return;
        }

        // Figure out which outgoing track maps to the incoming media data.
        let Some(track) = self
            .tracks_out
            .iter_mut()
            .find(|o| o.carries(origin, data.mid))
        else {
            return;
        };
        let Some(mid) = track.open_mid() else {
            return;
        };

        // Remember this value for keyframe requests.
        track.rid = data.rid;

        let Some(writer) = self.rtc.writer(mid) else {
            return;
        };

        // Match outgoing pt to incoming codec.
        let Some(pt) = writer.match_params(data.params) else {
            return;
        };

        if let Err(e) = writer.write(pt, data.network_time, data.time, data.data.clone()) {
            warn!(session = %self.session, "Relay write failed: {:?}", e);
            self.rtc.disconnect();
        }
    }

    pub fn handle_keyframe_request(&mut self, req: KeyframeRequest, mid_in: Mid) {
        let has_incoming_track = self.tracks_in.iter().any(|i| i.mid == mid_in);

        // This will be the case for all other client but the one where the track originates.
        if !has_incoming_track {
            return;
        }

        let Some(mut writer) = self.rtc.writer(mid_in) else {
            return;
        };

        if let Err(e) = writer.request_keyframe(req.rid, req.kind) {
            // This can fail if the rid doesn't match any media.
            debug!(session = %self.session, "request_keyframe failed: {:?}", e);
        }
    }
}
