//! Transport engine built on str0m
//!
//! One driver thread owns the UDP socket and every session's [`Rtc`]. The
//! core talks to it through [`Command`]s; the driver answers through each
//! session's [`EventSink`]. Media from published tracks is copied to relay
//! legs on the driver thread.

use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::AtomicU64;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use str0m::change::{SdpAnswer, SdpOffer};
use str0m::channel::ChannelId;
use str0m::media::{MediaKind, Mid};
use str0m::net::{Protocol, Receive};
use str0m::{Candidate, Input, Rtc};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::model::session::SessionId;
use crate::transport::{EventSink, Payload, Transport, TransportEngine};

mod client;
mod handle;
mod propagated;
mod tracks;

use client::Client;
use handle::RtcTransport;
use propagated::Propagated;
use tracks::LegId;

/// Upper bound on how long the driver waits on the socket before it looks at
/// the command queue again.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub(crate) enum RemoteDescription {
    Offer(SdpOffer),
    Answer(SdpAnswer),
}

pub(crate) enum Command {
    Create {
        session: SessionId,
        events: EventSink,
    },
    RemoteDescription {
        session: SessionId,
        description: RemoteDescription,
    },
    LocalDescription {
        session: SessionId,
    },
    RemoteCandidate {
        session: SessionId,
        candidate: Candidate,
    },
    AddLeg {
        session: SessionId,
        leg: LegId,
        origin: SessionId,
        source_mid: Mid,
        kind: MediaKind,
    },
    CloseLeg {
        session: SessionId,
        leg: LegId,
    },
    CloseContent {
        session: SessionId,
        mid: Mid,
    },
    Send {
        session: SessionId,
        channel: ChannelId,
        payload: Payload,
    },
    CloseChannel {
        session: SessionId,
        channel: ChannelId,
    },
    Close {
        session: SessionId,
    },
}

impl Command {
    fn session(&self) -> SessionId {
        match self {
            Command::Create { session, .. }
            | Command::RemoteDescription { session, .. }
            | Command::LocalDescription { session }
            | Command::RemoteCandidate { session, .. }
            | Command::AddLeg { session, .. }
            | Command::CloseLeg { session, .. }
            | Command::CloseContent { session, .. }
            | Command::Send { session, .. }
            | Command::CloseChannel { session, .. }
            | Command::Close { session } => *session,
        }
    }
}

pub struct RtcEngine {
    commands: Sender<Command>,
    local_addr: SocketAddr,
    advertised_addr: SocketAddr,
    next_leg: Arc<AtomicU64>,
}

impl RtcEngine {
    /// Bind the media socket on `local` and start the driver thread.
    ///
    /// The host candidate carries `advertised` when given, for hosts behind a
    /// 1:1 NAT, and the bound address otherwise.
    pub fn bind(local: IpAddr, port: u16, advertised: Option<IpAddr>) -> io::Result<RtcEngine> {
        let socket = UdpSocket::bind(SocketAddr::new(local, port))?;
        let local_addr = socket.local_addr()?;
        info!("Bound UDP port: {}", local_addr);

        let advertised_addr = advertised_address(local_addr, advertised);
        let host_candidate = Candidate::host(advertised_addr, "udp")
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e.to_string()))?;
        if advertised_addr != local_addr {
            info!("Advertising host candidate {}", advertised_addr);
        }

        let (tx, rx) = mpsc::channel();
        let driver_tx = tx.clone();
        thread::Builder::new()
            .name("rtc-driver".into())
            .spawn(move || run(socket, advertised_addr, host_candidate, rx, driver_tx))?;

        Ok(RtcEngine {
            commands: tx,
            local_addr,
            advertised_addr,
            next_leg: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the host candidate sent to peers.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised_addr
    }
}

/// Peers reach the socket on the bound port, whichever address they use.
fn advertised_address(local: SocketAddr, advertised: Option<IpAddr>) -> SocketAddr {
    match advertised {
        Some(ip) => SocketAddr::new(ip, local.port()),
        None => local,
    }
}

impl TransportEngine for RtcEngine {
    fn create_session(
        &self,
        session: SessionId,
        events: EventSink,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        self.commands
            .send(Command::Create { session, events })
            .map_err(|_| TransportError::EngineStopped)?;

        Ok(Arc::new(RtcTransport {
            session,
            commands: self.commands.clone(),
            next_leg: Arc::clone(&self.next_leg),
        }))
    }
}

/// Packets are handed to str0m as addressed to `candidate_addr`, the address
/// of the host candidate.
fn run(
    socket: UdpSocket,
    candidate_addr: SocketAddr,
    host_candidate: Candidate,
    rx: Receiver<Command>,
    commands: Sender<Command>,
) {
    let mut clients: Vec<Client> = vec![];
    let mut to_propagate: VecDeque<Propagated> = VecDeque::new();
    let mut buf = vec![0; 2000];

    loop {
        // Clean disconnected clients
        clients.retain_mut(|c| c.retain());

        // Apply everything the task loop asked for since the last turn.
        loop {
            match rx.try_recv() {
                Ok(command) => apply(command, &mut clients, &host_candidate, &commands),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Engine dropped, stopping rtc driver");
                    return;
                }
            }
        }

        // Poll clients until they return timeout
        let mut timeout = Instant::now() + COMMAND_POLL_INTERVAL;
        for client in clients.iter_mut() {
            let t = poll_until_timeout(client, &mut to_propagate, &socket);
            timeout = timeout.min(t);
        }

        // If we have an item to propagate, do that
        if let Some(p) = to_propagate.pop_front() {
            propagate(&p, &mut clients);
            continue;
        }

        // The read timeout is not allowed to be 0. In case it is 0, we set 1 millisecond.
        let duration = timeout
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));

        if let Err(e) = socket.set_read_timeout(Some(duration)) {
            warn!("Setting socket read timeout failed: {}", e);
        }

        if let Some(input) = read_socket_input(&socket, candidate_addr, &mut buf) {
            // The rtc.accepts() call is how we demultiplex the incoming packet to know which
            // Rtc instance the traffic belongs to.
            if let Some(client) = clients.iter_mut().find(|c| c.accepts(&input)) {
                client.handle_input(input);
            } else {
                // Common when the browser sends STUN before the offer was applied.
                debug!("No client accepts UDP input: {:?}", input);
            }
        }

        // Drive time forward in all clients.
        let now = Instant::now();
        for client in &mut clients {
            client.handle_input(Input::Timeout(now));
        }
    }
}

fn apply(
    command: Command,
    clients: &mut Vec<Client>,
    host_candidate: &Candidate,
    commands: &Sender<Command>,
) {
    if let Command::Create { session, events } = command {
        if let Some(pos) = clients.iter().position(|c| c.session == session) {
            // The old rtc's Closed goes to its own sink.
            warn!(%session, "Replacing existing rtc for session");
            let mut stale = clients.swap_remove(pos);
            stale.rtc.disconnect();
            stale.retain();
        }
        let mut rtc = Rtc::builder().build();
        if rtc.add_local_candidate(host_candidate.clone()).is_none() {
            warn!(%session, "Host candidate rejected");
        }
        clients.push(Client::new(
            session,
            rtc,
            events,
            commands.clone(),
            vec![host_candidate.clone()],
        ));
        info!(%session, "Created rtc");
        return;
    }

    let session = command.session();
    let Some(client) = clients.iter_mut().find(|c| c.session == session) else {
        debug!(%session, "Command for unknown rtc, dropping");
        return;
    };

    match command {
        Command::Create { .. } => {}
        Command::RemoteDescription { description, .. } => {
            client.handle_remote_description(description)
        }
        Command::LocalDescription { .. } => client.handle_local_description(),
        Command::RemoteCandidate { candidate, .. } => client.add_remote_candidate(candidate),
        Command::AddLeg {
            leg,
            origin,
            source_mid,
            kind,
            ..
        } => client.add_leg(leg, origin, source_mid, kind),
        Command::CloseLeg { leg, .. } => client.close_leg(leg),
        Command::CloseContent { mid, .. } => client.close_content(mid),
        Command::Send {
            channel, payload, ..
        } => client.send_channel(channel, &payload),
        Command::CloseChannel { channel, .. } => client.close_channel(channel),
        Command::Close { .. } => {
            info!(%session, "Closing rtc");
            client.rtc.disconnect();
        }
    }
}

/// Poll all the output from the client until it returns a timeout.
/// Collect any output in the queue, transmit data on the socket, return the timeout
fn poll_until_timeout(
    client: &mut Client,
    queue: &mut VecDeque<Propagated>,
    socket: &UdpSocket,
) -> Instant {
    loop {
        if !client.rtc.is_alive() {
            // This client will be cleaned up in the next run of the main loop.
            return Instant::now();
        }

        let propagated = client.poll_output(socket);

        if let Propagated::Timeout(t) = propagated {
            return t;
        }

        queue.push_back(propagated)
    }
}

/// Sends one "propagated" to all clients, if relevant
fn propagate(propagated: &Propagated, clients: &mut [Client]) {
    let Some(from) = propagated.session() else {
        // Noop or timeout, nothing to forward.
        return;
    };

    for client in &mut *clients {
        if client.session == from {
            // Do not propagate to originating client.
            continue;
        }

        match propagated {
            Propagated::MediaData(_, data) => client.handle_media_data_out(from, data),
            Propagated::KeyframeRequest(_, req, origin, mid_in) => {
                // Only one origin client handles the keyframe request.
                if *origin == client.session {
                    client.handle_keyframe_request(*req, *mid_in)
                }
            }
            Propagated::Noop | Propagated::Timeout(_) => {}
        }
    }
}

fn read_socket_input<'a>(
    socket: &UdpSocket,
    destination: SocketAddr,
    buf: &'a mut Vec<u8>,
) -> Option<Input<'a>> {
    buf.resize(2000, 0);

    match socket.recv_from(buf) {
        Ok((n, source)) => {
            buf.truncate(n);

            // Parse data to a DatagramRecv, which help preparse network data to
            // figure out the multiplexing of all protocols on one UDP port.
            let Ok(contents) = buf.as_slice().try_into() else {
                return None;
            };

            Some(Input::Receive(
                Instant::now(),
                Receive {
                    proto: Protocol::Udp,
                    source,
                    destination,
                    contents,
                },
            ))
        }

        Err(e) => match e.kind() {
            // Expected error for set_read_timeout(). One for windows, one for the rest.
            ErrorKind::WouldBlock | ErrorKind::TimedOut => None,
            _ => {
                warn!("UdpSocket read failed: {:?}", e);
                None
            }
        },
    }
}
