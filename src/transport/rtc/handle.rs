//! Handles the core holds onto str0m-backed state
//!
//! Every handle is a thin wrapper around the driver's command channel. The
//! work happens later on the driver thread; only parsing errors and a stopped
//! driver are reported synchronously.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use str0m::change::{SdpAnswer, SdpOffer};
use str0m::channel::ChannelId;
use str0m::media::Mid;
use str0m::Candidate;

use crate::error::TransportError;
use crate::model::session::SessionId;
use crate::transport::rtc::tracks::{media_kind, LegId};
use crate::transport::rtc::{Command, RemoteDescription};
use crate::transport::{
    ContentDescription, DataChannel, Payload, PublishedContent, RelayLeg, SdpKind, Transport,
};

fn dispatch(commands: &Sender<Command>, command: Command) -> Result<(), TransportError> {
    commands.send(command).map_err(|_| TransportError::EngineStopped)
}

pub struct RtcTransport {
    pub(super) session: SessionId,
    pub(super) commands: Sender<Command>,
    pub(super) next_leg: Arc<AtomicU64>,
}

impl Transport for RtcTransport {
    fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> Result<(), TransportError> {
        let description = match kind {
            SdpKind::Offer => SdpOffer::from_sdp_string(sdp).map(RemoteDescription::Offer),
            SdpKind::Answer => SdpAnswer::from_sdp_string(sdp).map(RemoteDescription::Answer),
        }
        .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;

        dispatch(
            &self.commands,
            Command::RemoteDescription {
                session: self.session,
                description,
            },
        )
    }

    fn set_local_description(&self) -> Result<(), TransportError> {
        dispatch(
            &self.commands,
            Command::LocalDescription {
                session: self.session,
            },
        )
    }

    fn add_remote_candidate(&self, candidate: &str, _mid: Option<&str>) -> Result<(), TransportError> {
        let candidate = candidate.strip_prefix("a=").unwrap_or(candidate);
        let candidate = Candidate::from_sdp_string(candidate)
            .map_err(|e| TransportError::InvalidCandidate(e.to_string()))?;

        dispatch(
            &self.commands,
            Command::RemoteCandidate {
                session: self.session,
                candidate,
            },
        )
    }

    fn add_outbound_leg(
        &self,
        content: &ContentDescription,
    ) -> Result<Box<dyn RelayLeg>, TransportError> {
        if content.track.is_empty() {
            return Err(TransportError::UnsupportedContent("empty track id".into()));
        }
        let leg = self.next_leg.fetch_add(1, Ordering::Relaxed);

        dispatch(
            &self.commands,
            Command::AddLeg {
                session: self.session,
                leg,
                origin: content.origin,
                source_mid: Mid::from(content.track.as_str()),
                kind: media_kind(content.kind),
            },
        )?;

        Ok(Box::new(RtcLeg {
            session: self.session,
            leg,
            commands: self.commands.clone(),
        }))
    }

    fn close(&self) {
        let _ = dispatch(
            &self.commands,
            Command::Close {
                session: self.session,
            },
        );
    }
}

#[derive(Debug)]
pub struct RtcLeg {
    session: SessionId,
    leg: LegId,
    commands: Sender<Command>,
}

impl RelayLeg for RtcLeg {
    fn close(&self) {
        let _ = dispatch(
            &self.commands,
            Command::CloseLeg {
                session: self.session,
                leg: self.leg,
            },
        );
    }
}

#[derive(Debug)]
pub struct RtcContent {
    pub(super) description: ContentDescription,
    pub(super) mid: Mid,
    pub(super) commands: Sender<Command>,
}

impl PublishedContent for RtcContent {
    fn description(&self) -> &ContentDescription {
        &self.description
    }

    fn close(&self) {
        let _ = dispatch(
            &self.commands,
            Command::CloseContent {
                session: self.description.origin,
                mid: self.mid,
            },
        );
    }
}

#[derive(Debug)]
pub struct RtcChannel {
    pub(super) session: SessionId,
    pub(super) id: ChannelId,
    pub(super) label: String,
    pub(super) open: Arc<AtomicBool>,
    pub(super) commands: Sender<Command>,
}

impl DataChannel for RtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        dispatch(
            &self.commands,
            Command::Send {
                session: self.session,
                channel: self.id,
                payload: payload.clone(),
            },
        )
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
        let _ = dispatch(
            &self.commands,
            Command::CloseChannel {
                session: self.session,
                channel: self.id,
            },
        );
    }
}
