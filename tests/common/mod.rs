//! In-memory transport engine and signaling sink for driving the router
//! without any network.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use hub_rtc::error::{SignalingError, TransportError};
use hub_rtc::model::session::{ConnectionId, SessionId, SignalingSink};
use hub_rtc::router::{Router, RouterConfig};
use hub_rtc::task_loop::{self, TaskLoop};
use hub_rtc::transport::{
    ConnectionState, ContentDescription, ContentKind, DataChannel, EventSink, LocalCandidate,
    Payload, PublishedContent, RelayLeg, SdpKind, Transport, TransportEngine, TransportEvent,
};

/// Every command the core issued on one transport, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RemoteDescription(SdpKind, String),
    LocalDescription,
    RemoteCandidate(String, Option<String>),
    AddLeg(SessionId),
    Close,
}

#[derive(Debug, Clone)]
pub struct LegRecord {
    pub source: ContentDescription,
    pub closed: Arc<AtomicBool>,
}

pub struct FakeTransport {
    pub session: SessionId,
    events: EventSink,
    calls: Mutex<Vec<Call>>,
    legs: Mutex<BTreeMap<u64, LegRecord>>,
    next_leg: AtomicU64,
    pending_offer: AtomicBool,
    pub fail_legs: AtomicBool,
}

impl FakeTransport {
    pub fn new(session: SessionId, events: EventSink) -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            session,
            events,
            calls: Mutex::new(Vec::new()),
            legs: Mutex::new(BTreeMap::new()),
            next_leg: AtomicU64::new(1),
            pending_offer: AtomicBool::new(false),
            fail_legs: AtomicBool::new(false),
        })
    }

    pub fn detached(session: u64) -> Arc<FakeTransport> {
        Self::new(SessionId::new(session), EventSink::discard())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().contains(&Call::Close)
    }

    /// Inbound relay legs that are still open, by the session whose content
    /// they carry.
    pub fn open_legs(&self) -> Vec<SessionId> {
        self.legs
            .lock()
            .unwrap()
            .values()
            .filter(|l| !l.closed.load(Ordering::SeqCst))
            .map(|l| l.source.origin)
            .collect()
    }

    pub fn emit(&self, event: TransportEvent) {
        self.events.emit(event);
    }

    pub fn connect(&self) {
        self.emit(TransportEvent::StateChanged(ConnectionState::Connected));
    }

    pub fn publish(&self, track: &str) -> Arc<FakeContent> {
        let content = FakeContent::new(self.session, track);
        self.emit(TransportEvent::ContentOpened(content.clone()));
        content
    }

    pub fn open_channel(&self) -> Arc<FakeChannel> {
        let channel = FakeChannel::new("chat");
        self.emit(TransportEvent::ChannelOpened(channel.clone()));
        channel
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Transport for FakeTransport {
    fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> Result<(), TransportError> {
        if sdp.is_empty() {
            return Err(TransportError::InvalidDescription("empty".into()));
        }
        self.pending_offer
            .store(kind == SdpKind::Offer, Ordering::SeqCst);
        self.record(Call::RemoteDescription(kind, sdp.to_string()));
        Ok(())
    }

    fn set_local_description(&self) -> Result<(), TransportError> {
        self.record(Call::LocalDescription);
        let kind = if self.pending_offer.swap(false, Ordering::SeqCst) {
            SdpKind::Answer
        } else {
            SdpKind::Offer
        };
        self.events.emit(TransportEvent::LocalDescription {
            kind,
            sdp: format!("{kind:?} for {}", self.session),
        });
        Ok(())
    }

    fn add_remote_candidate(&self, candidate: &str, mid: Option<&str>) -> Result<(), TransportError> {
        self.record(Call::RemoteCandidate(
            candidate.to_string(),
            mid.map(str::to_string),
        ));
        Ok(())
    }

    fn add_outbound_leg(
        &self,
        content: &ContentDescription,
    ) -> Result<Box<dyn RelayLeg>, TransportError> {
        if self.fail_legs.load(Ordering::SeqCst) {
            return Err(TransportError::UnsupportedContent("refused".into()));
        }
        self.record(Call::AddLeg(content.origin));
        let closed = Arc::new(AtomicBool::new(false));
        let id = self.next_leg.fetch_add(1, Ordering::SeqCst);
        self.legs.lock().unwrap().insert(
            id,
            LegRecord {
                source: content.clone(),
                closed: Arc::clone(&closed),
            },
        );
        Ok(Box::new(FakeLeg { closed }))
    }

    fn close(&self) {
        self.record(Call::Close);
    }
}

#[derive(Debug)]
pub struct FakeLeg {
    closed: Arc<AtomicBool>,
}

impl RelayLeg for FakeLeg {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeContent {
    description: ContentDescription,
    closed: AtomicBool,
}

impl FakeContent {
    pub fn new(origin: SessionId, track: &str) -> Arc<FakeContent> {
        Arc::new(FakeContent {
            description: ContentDescription {
                origin,
                kind: ContentKind::Audio,
                track: track.to_string(),
            },
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PublishedContent for FakeContent {
    fn description(&self) -> &ContentDescription {
        &self.description
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    pub fail: AtomicBool,
    received: Mutex<Vec<Payload>>,
}

impl FakeChannel {
    pub fn new(label: &str) -> Arc<FakeChannel> {
        Arc::new(FakeChannel {
            label: label.to_string(),
            open: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn received(&self) -> Vec<Payload> {
        self.received.lock().unwrap().clone()
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

impl DataChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.received.lock().unwrap().push(payload.clone());
        Ok(())
    }

    fn close(&self) {
        self.set_open(false);
    }
}

#[derive(Default)]
pub struct FakeEngine {
    /// Every transport ever created, oldest first.
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    pub fail_create: AtomicBool,
}

impl FakeEngine {
    /// The latest transport created for `session`.
    pub fn transport(&self, session: SessionId) -> Option<Arc<FakeTransport>> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.session == session)
            .cloned()
    }

    pub fn created(&self) -> usize {
        self.transports.lock().unwrap().len()
    }
}

impl TransportEngine for FakeEngine {
    fn create_session(
        &self,
        session: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::EngineStopped);
        }
        let transport = FakeTransport::new(session, events);
        self.transports.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Records every text frame the router sends on one connection.
#[derive(Default)]
pub struct FakeSink {
    sent: Mutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl FakeSink {
    pub fn envelopes(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.envelopes()
            .iter()
            .map(|v| v["type"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl SignalingSink for FakeSink {
    fn send_text(&self, text: String) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::ConnectionClosed);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }
}

/// A router wired to a fake engine, stepped by hand.
pub struct Harness {
    pub router: Router,
    pub tasks: TaskLoop<Router>,
    pub engine: Arc<FakeEngine>,
}

impl Harness {
    pub fn new() -> Harness {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Harness {
        let engine = Arc::new(FakeEngine::default());
        let (handle, tasks) = task_loop::channel();
        let router = Router::new(config, engine.clone(), handle);
        Harness {
            router,
            tasks,
            engine,
        }
    }

    /// Run every queued task, including the ones they enqueue.
    pub fn settle(&mut self) -> usize {
        self.tasks.drain(&mut self.router)
    }

    pub fn connect(&mut self, conn: u64) -> Arc<FakeSink> {
        let sink = Arc::new(FakeSink::default());
        self.router.on_connection_open(ConnectionId(conn), sink.clone());
        sink
    }

    pub fn send(&mut self, conn: u64, text: &str) {
        self.router.on_message(ConnectionId(conn), text);
        self.settle();
    }

    pub fn offer(&mut self, conn: u64, room: &str) {
        let text = serde_json::json!({"type": "offer", "sdp": "v=0", "room_id": room}).to_string();
        self.send(conn, &text);
    }

    pub fn disconnect(&mut self, conn: u64) {
        self.router.on_connection_closed(ConnectionId(conn));
        self.settle();
    }

    pub fn session_id(&self, conn: u64) -> SessionId {
        self.router.session_for(ConnectionId(conn)).unwrap().id
    }

    pub fn transport(&self, conn: u64) -> Arc<FakeTransport> {
        self.engine.transport(self.session_id(conn)).unwrap()
    }

    /// Connect, offer into `room`, and bring the transport up.
    pub fn join(&mut self, conn: u64, room: &str) -> (Arc<FakeSink>, Arc<FakeTransport>) {
        let sink = self.connect(conn);
        self.offer(conn, room);
        let transport = self.transport(conn);
        transport.connect();
        self.settle();
        (sink, transport)
    }
}

pub fn local_candidate(candidate: &str) -> TransportEvent {
    TransportEvent::LocalCandidate(Some(LocalCandidate {
        candidate: candidate.to_string(),
        mid: Some("0".to_string()),
    }))
}
