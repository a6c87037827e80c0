use super::media::{LocalStream, LocalTrack, MediaCapture};
use super::monitor::{CallMonitor, CallStatus};
use super::session::{close_transport, NegotiationSession};
use super::state::{CallRole, NegotiationState};
use super::transport::{PeerTransport, RemoteTrack, TransportEvents, TransportFactory};
use crate::config::NegotiationConfig;
use crate::error::{Error, Result};
use crate::ids::ConnectionHandle;
use crate::signaling::{
    ClientMessage, IceCandidate, JoinRequest, ServerMessage, SessionDescription, UserInfo,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the negotiator reacts to: commands from the UI, messages from
/// the signaling server, and completions of its own background steps.
///
/// Completions carry the attempt they were started for; anything tagged with
/// an older attempt is stale and only has its resources released.
pub enum NegotiationEvent {
    StartCall {
        peer: ConnectionHandle,
    },
    AcceptCall,
    EndCall,
    LeaveRoom,
    Signal(ServerMessage),
    MediaReady {
        attempt: u64,
        result: Result<Box<dyn LocalStream>>,
    },
    TransportReady {
        attempt: u64,
        result: Result<Arc<dyn PeerTransport>>,
    },
    LocalDescriptionReady {
        attempt: u64,
        result: Result<SessionDescription>,
    },
    RemoteAnswerApplied {
        attempt: u64,
        result: Result<()>,
    },
    LocalCandidate {
        attempt: u64,
        candidate: IceCandidate,
    },
    RemoteTrack {
        attempt: u64,
        track: RemoteTrack,
    },
    TransportFailed {
        attempt: u64,
        reason: String,
    },
    TimedOut {
        attempt: u64,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// This side hung up
    Local,
    /// The peer sent `end-call`
    Remote,
    /// The peer left the room or disconnected
    PeerLeft,
    /// The server confirmed we left the room
    RoomLeft,
    TransportFailure,
    Timeout,
}

/// What the UI gets told about.
#[derive(Debug, Clone)]
pub enum CallNotice {
    RoomJoined(JoinRequest),
    RoomLeft,
    UserJoined(UserInfo),
    UserLeft(UserInfo),
    IncomingCall {
        from: ConnectionHandle,
    },
    Connected {
        peer: ConnectionHandle,
        role: CallRole,
    },
    RemoteTrack {
        peer: ConnectionHandle,
        track: RemoteTrack,
    },
    Ended {
        peer: Option<ConnectionHandle>,
        reason: EndReason,
    },
    Error(String),
}

/// Cloneable command side of a running [`Negotiator`].
#[derive(Clone)]
pub struct NegotiatorHandle {
    tx: mpsc::UnboundedSender<NegotiationEvent>,
}

impl NegotiatorHandle {
    pub fn start_call(&self, peer: ConnectionHandle) -> Result<()> {
        self.send(NegotiationEvent::StartCall { peer })
    }

    pub fn accept_call(&self) -> Result<()> {
        self.send(NegotiationEvent::AcceptCall)
    }

    pub fn end_call(&self) -> Result<()> {
        self.send(NegotiationEvent::EndCall)
    }

    pub fn leave_room(&self) -> Result<()> {
        self.send(NegotiationEvent::LeaveRoom)
    }

    /// Feeds a message received from the signaling server.
    pub fn deliver(&self, message: ServerMessage) -> Result<()> {
        self.send(NegotiationEvent::Signal(message))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(NegotiationEvent::Shutdown)
    }

    fn send(&self, event: NegotiationEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::Signaling("negotiator has stopped".into()))
    }
}

/// Client-side call negotiation for one local user.
///
/// Processes one event at a time. Media acquisition, transport creation and
/// description generation run as spawned tasks that report back through the
/// same queue, so ending a call never waits on any of them.
pub struct Negotiator {
    config: NegotiationConfig,
    media: Arc<dyn MediaCapture>,
    transports: Arc<dyn TransportFactory>,
    signaling: mpsc::UnboundedSender<ClientMessage>,
    notices: mpsc::UnboundedSender<CallNotice>,
    events_tx: mpsc::UnboundedSender<NegotiationEvent>,
    events_rx: mpsc::UnboundedReceiver<NegotiationEvent>,
    state: NegotiationState,
    session: NegotiationSession,
    attempt: u64,
    timer: Option<JoinHandle<()>>,
    monitor: CallMonitor,
}

impl Negotiator {
    pub fn new(
        config: NegotiationConfig,
        media: Arc<dyn MediaCapture>,
        transports: Arc<dyn TransportFactory>,
        signaling: mpsc::UnboundedSender<ClientMessage>,
    ) -> (Self, NegotiatorHandle, mpsc::UnboundedReceiver<CallNotice>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let handle = NegotiatorHandle {
            tx: events_tx.clone(),
        };
        let negotiator = Self {
            config,
            media,
            transports,
            signaling,
            notices,
            events_tx,
            events_rx,
            state: NegotiationState::Idle,
            session: NegotiationSession::default(),
            attempt: 0,
            timer: None,
            monitor: CallMonitor::new(),
        };
        (negotiator, handle, notices_rx)
    }

    pub fn state(&self) -> &NegotiationState {
        &self.state
    }

    pub fn monitor(&self) -> &CallMonitor {
        &self.monitor
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.monitor.subscribe()
    }

    /// Processes events until shut down.
    pub async fn run(mut self) {
        while self.process_next().await {}
        debug!("negotiator stopped");
    }

    /// Waits for the next event and processes it. Returns `false` once the
    /// negotiator has been shut down.
    pub async fn process_next(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => self.step(event),
            None => false,
        }
    }

    /// Processes whatever is already queued without waiting.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            processed += 1;
            if !self.step(event) {
                break;
            }
        }
        processed
    }

    pub fn step(&mut self, event: NegotiationEvent) -> bool {
        match event {
            NegotiationEvent::StartCall { peer } => self.start_call(peer),
            NegotiationEvent::AcceptCall => self.accept_call(),
            NegotiationEvent::EndCall => self.end_call(),
            NegotiationEvent::LeaveRoom => self.leave_room(),
            NegotiationEvent::Signal(message) => self.on_signal(message),
            NegotiationEvent::MediaReady { attempt, result } => self.on_media_ready(attempt, result),
            NegotiationEvent::TransportReady { attempt, result } => {
                self.on_transport_ready(attempt, result)
            }
            NegotiationEvent::LocalDescriptionReady { attempt, result } => {
                self.on_local_description(attempt, result)
            }
            NegotiationEvent::RemoteAnswerApplied { attempt, result } => {
                self.on_remote_answer(attempt, result)
            }
            NegotiationEvent::LocalCandidate { attempt, candidate } => {
                self.on_local_candidate(attempt, candidate)
            }
            NegotiationEvent::RemoteTrack { attempt, track } => self.on_remote_track(attempt, track),
            NegotiationEvent::TransportFailed { attempt, reason } => {
                self.on_transport_failed(attempt, reason)
            }
            NegotiationEvent::TimedOut { attempt } => self.on_timeout(attempt),
            NegotiationEvent::Shutdown => {
                if !self.state.is_idle() {
                    self.teardown(EndReason::Local, true, false);
                }
                return false;
            }
        }
        true
    }

    fn start_call(&mut self, peer: ConnectionHandle) {
        if !self.state.is_idle() {
            warn!(%peer, state = %self.state, "call requested while busy");
            self.notify(CallNotice::Error("A call is already in progress.".into()));
            return;
        }
        info!(%peer, "starting call");
        self.acquire_media(peer, CallRole::Caller);
    }

    fn accept_call(&mut self) {
        let NegotiationState::IncomingCallReceived { peer } = self.state.clone() else {
            debug!(state = %self.state, "no incoming call to accept");
            return;
        };
        info!(%peer, "accepting call");
        self.acquire_media(peer, CallRole::Callee);
    }

    fn end_call(&mut self) {
        if self.state.is_idle() {
            debug!("end requested with no call");
            return;
        }
        self.teardown(EndReason::Local, true, self.config.leave_room_on_end);
    }

    fn leave_room(&mut self) {
        if !self.state.is_idle() {
            self.teardown(EndReason::Local, true, false);
        }
        self.signal(ClientMessage::LeaveRoom);
    }

    fn acquire_media(&mut self, peer: ConnectionHandle, role: CallRole) {
        self.attempt += 1;
        let attempt = self.attempt;
        self.set_state(NegotiationState::MediaAcquiring { peer, role });

        let media = Arc::clone(&self.media);
        let constraints = self.config.constraints;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = media.acquire(constraints).await;
            let _ = tx.send(NegotiationEvent::MediaReady { attempt, result });
        });
    }

    fn on_media_ready(&mut self, attempt: u64, result: Result<Box<dyn LocalStream>>) {
        let (peer, role) = match &self.state {
            NegotiationState::MediaAcquiring { peer, role } if attempt == self.attempt => {
                (peer.clone(), *role)
            }
            _ => {
                if let Ok(mut stream) = result {
                    debug!(attempt, "releasing media from an abandoned call");
                    stream.stop();
                }
                return;
            }
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer, error = %e, "media acquisition failed");
                self.monitor.set_error(e.to_string());
                self.notify(CallNotice::Error(format!(
                    "Could not access camera or microphone: {e}"
                )));
                self.attempt += 1;
                self.session.release();
                self.set_state(NegotiationState::Idle);
                return;
            }
        };

        self.session.stream = Some(stream);
        let next = match role {
            CallRole::Caller => NegotiationState::Offering { peer },
            CallRole::Callee => NegotiationState::Answering { peer },
        };
        self.set_state(next);
        self.arm_timeout(attempt);

        let factory = Arc::clone(&self.transports);
        let events = TransportEvents::new(attempt, self.events_tx.clone());
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = factory.create(events).await;
            let _ = tx.send(NegotiationEvent::TransportReady { attempt, result });
        });
    }

    fn on_transport_ready(&mut self, attempt: u64, result: Result<Arc<dyn PeerTransport>>) {
        if attempt != self.attempt || !self.state.is_negotiating() {
            if let Ok(transport) = result {
                debug!(attempt, "closing transport from an abandoned call");
                close_transport(transport);
            }
            return;
        }

        let transport = match result {
            Ok(transport) => transport,
            Err(e) => return self.fail(e),
        };

        let remote_offer = match self.state {
            NegotiationState::Answering { .. } => match self.session.remote_offer.take() {
                Some(offer) => Some(offer),
                None => {
                    close_transport(transport);
                    return self.fail(Error::Signaling("no offer to answer".into()));
                }
            },
            _ => None,
        };

        self.session.transport = Some(Arc::clone(&transport));
        let tracks = self
            .session
            .stream
            .as_ref()
            .map(|stream| stream.tracks())
            .unwrap_or_default();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = describe(transport, tracks, remote_offer).await;
            let _ = tx.send(NegotiationEvent::LocalDescriptionReady { attempt, result });
        });
    }

    fn on_local_description(&mut self, attempt: u64, result: Result<SessionDescription>) {
        if attempt != self.attempt {
            return;
        }
        let description = match result {
            Ok(description) => description,
            Err(e) if self.state.is_negotiating() => return self.fail(e),
            Err(_) => return,
        };

        match self.state.clone() {
            NegotiationState::Offering { peer } => {
                info!(%peer, attempt, "offer sent");
                self.signal(ClientMessage::OfferCall {
                    to: peer.clone(),
                    offer: description,
                });
                self.flush_local_candidates(&peer);
            }
            NegotiationState::Answering { peer } => {
                self.signal(ClientMessage::AnswerCall {
                    to: peer.clone(),
                    answer: description,
                });
                self.flush_local_candidates(&peer);
                self.flush_pending_candidates();
                self.connected(peer, CallRole::Callee);
            }
            _ => {}
        }
    }

    /// Sends the candidates gathered while the description was being
    /// committed, in gathering order. Later candidates go out directly.
    fn flush_local_candidates(&mut self, peer: &ConnectionHandle) {
        self.session.description_sent = true;
        for candidate in std::mem::take(&mut self.session.local_candidates) {
            self.signal(ClientMessage::IceCandidate {
                to: peer.clone(),
                candidate,
            });
        }
    }

    fn on_remote_answer(&mut self, attempt: u64, result: Result<()>) {
        if attempt != self.attempt {
            return;
        }
        let NegotiationState::AwaitingAnswer { peer } = self.state.clone() else {
            return;
        };
        match result {
            Ok(()) => {
                self.flush_pending_candidates();
                self.connected(peer, CallRole::Caller);
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_local_candidate(&mut self, attempt: u64, candidate: IceCandidate) {
        if attempt != self.attempt || !self.state.trickles_candidates() {
            debug!(attempt, "dropping local candidate");
            return;
        }
        if !self.session.description_sent {
            self.session.local_candidates.push(candidate);
            return;
        }
        if let Some(peer) = self.state.peer().cloned() {
            self.signal(ClientMessage::IceCandidate {
                to: peer,
                candidate,
            });
        }
    }

    fn on_remote_track(&mut self, attempt: u64, track: RemoteTrack) {
        if attempt != self.attempt {
            return;
        }
        if let Some(peer) = self.state.peer().cloned() {
            info!(%peer, kind = ?track.kind, "remote track arrived");
            self.notify(CallNotice::RemoteTrack { peer, track });
        }
    }

    fn on_transport_failed(&mut self, attempt: u64, reason: String) {
        if attempt != self.attempt || self.state.is_idle() {
            return;
        }
        warn!(attempt, %reason, "transport failed");
        self.monitor.set_error(reason.clone());
        self.notify(CallNotice::Error(reason));
        self.teardown(
            EndReason::TransportFailure,
            true,
            self.config.leave_room_on_end,
        );
    }

    fn on_timeout(&mut self, attempt: u64) {
        if attempt != self.attempt || !self.state.is_negotiating() {
            return;
        }
        warn!(attempt, state = %self.state, "negotiation timed out");
        self.monitor.set_error("negotiation timed out");
        self.teardown(EndReason::Timeout, true, self.config.leave_room_on_end);
    }

    fn on_signal(&mut self, message: ServerMessage) {
        debug!(event = message.name(), state = %self.state, "signal received");
        match message {
            ServerMessage::RoomJoined(request) => self.notify(CallNotice::RoomJoined(request)),
            ServerMessage::RoomLeft => {
                if !self.state.is_idle() {
                    self.teardown(EndReason::RoomLeft, false, false);
                }
                self.notify(CallNotice::RoomLeft);
            }
            ServerMessage::UserJoined(user) => self.notify(CallNotice::UserJoined(user)),
            ServerMessage::UserLeft(user) => {
                let was_peer = self.state.peer() == Some(&user.handle);
                self.notify(CallNotice::UserLeft(user));
                if was_peer {
                    self.teardown(EndReason::PeerLeft, false, self.config.leave_room_on_end);
                }
            }
            ServerMessage::Error(text) => {
                warn!(%text, "server reported an error");
                self.monitor.set_error(text.clone());
                self.notify(CallNotice::Error(text));
            }
            ServerMessage::IncomingCall { from, offer } => self.on_incoming_call(from, offer),
            ServerMessage::CallAccepted { from, answer } => self.on_call_accepted(from, answer),
            ServerMessage::IceResponse { candidate } => self.on_remote_candidate(candidate),
            ServerMessage::CallEnded => {
                if self.state.is_idle() {
                    debug!("call-ended with no call");
                    return;
                }
                self.teardown(EndReason::Remote, true, self.config.leave_room_on_end);
            }
        }
    }

    fn on_incoming_call(&mut self, from: ConnectionHandle, offer: SessionDescription) {
        if !self.state.is_idle() {
            warn!(%from, state = %self.state, "ignoring incoming call while busy");
            return;
        }
        info!(%from, "incoming call");
        self.session.remote_offer = Some(offer);
        self.set_state(NegotiationState::IncomingCallReceived { peer: from.clone() });
        self.notify(CallNotice::IncomingCall { from });
        if self.config.auto_accept {
            self.accept_call();
        }
    }

    fn on_call_accepted(&mut self, from: ConnectionHandle, answer: SessionDescription) {
        let transport = match (&self.state, &self.session.transport) {
            (NegotiationState::Offering { peer }, Some(transport)) if *peer == from => {
                Arc::clone(transport)
            }
            _ => {
                debug!(%from, state = %self.state, "ignoring unexpected answer");
                return;
            }
        };

        let attempt = self.attempt;
        self.set_state(NegotiationState::AwaitingAnswer { peer: from });
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = transport.set_remote_description(answer).await;
            let _ = tx.send(NegotiationEvent::RemoteAnswerApplied { attempt, result });
        });
    }

    fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(transport) = self.session.transport.as_ref().map(Arc::clone) else {
            debug!(state = %self.state, "dropping remote candidate with no transport");
            return;
        };
        match self.state {
            NegotiationState::Connected { .. } => apply_candidate(transport, candidate),
            // No remote description committed yet.
            NegotiationState::Offering { .. }
            | NegotiationState::AwaitingAnswer { .. }
            | NegotiationState::Answering { .. } => self.session.pending_candidates.push(candidate),
            _ => debug!(state = %self.state, "dropping unexpected remote candidate"),
        }
    }

    fn flush_pending_candidates(&mut self) {
        let Some(transport) = self.session.transport.as_ref() else {
            return;
        };
        for candidate in self.session.pending_candidates.drain(..) {
            apply_candidate(Arc::clone(transport), candidate);
        }
    }

    fn connected(&mut self, peer: ConnectionHandle, role: CallRole) {
        self.disarm_timeout();
        info!(%peer, ?role, attempt = self.attempt, "call connected");
        self.set_state(NegotiationState::Connected {
            peer: peer.clone(),
            role,
        });
        self.notify(CallNotice::Connected { peer, role });
    }

    fn fail(&mut self, error: Error) {
        warn!(error = %error, state = %self.state, "negotiation failed");
        self.monitor.set_error(error.to_string());
        self.notify(CallNotice::Error(error.to_string()));
        self.teardown(
            EndReason::TransportFailure,
            true,
            self.config.leave_room_on_end,
        );
    }

    /// Releases media and transport, tells the peer and the room as asked,
    /// and returns to `Idle`. Bumping the attempt orphans every outstanding
    /// completion.
    fn teardown(&mut self, reason: EndReason, notify_peer: bool, leave_room: bool) {
        let peer = self.state.peer().cloned();
        self.attempt += 1;
        self.disarm_timeout();
        self.session.release();
        self.set_state(NegotiationState::Ended);

        if notify_peer {
            self.signal(ClientMessage::EndCall { to: peer.clone() });
        }
        if leave_room {
            self.signal(ClientMessage::LeaveRoom);
        }

        info!(peer = ?peer, ?reason, "call ended");
        self.notify(CallNotice::Ended { peer, reason });
        self.set_state(NegotiationState::Idle);
    }

    fn arm_timeout(&mut self, attempt: u64) {
        self.disarm_timeout();
        let Some(timeout) = self.config.negotiation_timeout else {
            return;
        };
        let tx = self.events_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(NegotiationEvent::TimedOut { attempt });
        }));
    }

    fn disarm_timeout(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn set_state(&mut self, state: NegotiationState) {
        debug!(from = %self.state, to = %state, attempt = self.attempt, "state change");
        self.monitor.update_state(state.clone());
        self.state = state;
    }

    fn signal(&self, message: ClientMessage) {
        if self.signaling.send(message).is_err() {
            warn!("signaling channel closed");
        }
    }

    fn notify(&self, notice: CallNotice) {
        let _ = self.notices.send(notice);
    }
}

/// Attaches local tracks and produces the committed local description: an
/// answer to `remote_offer` when there is one, otherwise an offer.
async fn describe(
    transport: Arc<dyn PeerTransport>,
    tracks: Vec<LocalTrack>,
    remote_offer: Option<SessionDescription>,
) -> Result<SessionDescription> {
    for track in tracks {
        transport.add_track(track).await?;
    }
    let local = match remote_offer {
        Some(offer) => {
            transport.set_remote_description(offer).await?;
            transport.create_answer().await?
        }
        None => transport.create_offer().await?,
    };
    transport.set_local_description(local.clone()).await?;
    Ok(local)
}

fn apply_candidate(transport: Arc<dyn PeerTransport>, candidate: IceCandidate) {
    tokio::spawn(async move {
        if let Err(e) = transport.add_ice_candidate(candidate).await {
            debug!(error = %e, "failed to apply remote candidate");
        }
    });
}
