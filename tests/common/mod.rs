#![allow(dead_code)]

use async_trait::async_trait;
use facechat::config::MediaConstraints;
use facechat::negotiation::{
    CallNotice, CallStatus, LocalStream, LocalTrack, MediaCapture, Negotiator, NegotiatorHandle,
    PeerTransport, TransportEvents, TransportFactory,
};
use facechat::room::Delivery;
use facechat::signaling::{IceCandidate, SessionDescription};
use facechat::{ClientMessage, ConnectionHandle, Error, NegotiationConfig, Result, SignalingHub};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

pub const WAIT: Duration = Duration::from_secs(5);

/// Capture that hands out track-less streams and counts how many were stopped.
#[derive(Default)]
pub struct FakeCapture {
    gate: Option<Arc<Notify>>,
    refuse: bool,
    pub acquired: AtomicUsize,
    pub stopped: Arc<AtomicUsize>,
}

impl FakeCapture {
    /// Acquisition blocks until `release` is called on the returned gate.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let capture = Self {
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        (capture, gate)
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire(&self, _constraints: MediaConstraints) -> Result<Box<dyn LocalStream>> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.refuse {
            return Err(Error::Media("permission denied".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            stopped: Arc::clone(&self.stopped),
        }))
    }
}

struct FakeStream {
    stopped: Arc<AtomicUsize>,
}

impl LocalStream for FakeStream {
    fn tracks(&self) -> Vec<LocalTrack> {
        Vec::new()
    }

    fn stop(&mut self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transport that records what the negotiator asked of it.
#[derive(Default)]
pub struct FakeTransport {
    pub remote: Mutex<Option<SessionDescription>>,
    pub local: Mutex<Option<SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicUsize,
}

impl FakeTransport {
    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) > 0
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, _track: LocalTrack) -> Result<()> {
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0\r\ns=fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("v=0\r\ns=fake-answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        *self.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory that keeps every transport it built, together with its events
/// sink so tests can play the part of the network.
#[derive(Default)]
pub struct FakeFactory {
    built: Mutex<Vec<(Arc<FakeTransport>, TransportEvents)>>,
}

impl FakeFactory {
    pub fn count(&self) -> usize {
        self.built.lock().unwrap().len()
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        Arc::clone(&self.built.lock().unwrap()[index].0)
    }

    pub fn events(&self, index: usize) -> TransportEvents {
        self.built.lock().unwrap()[index].1.clone()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self, events: TransportEvents) -> Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(FakeTransport::default());
        self.built
            .lock()
            .unwrap()
            .push((Arc::clone(&transport), events));
        Ok(transport)
    }
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2122252543 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

/// One client wired to an in-process hub: the negotiator's outgoing messages
/// are dispatched as if they came over its socket, and everything the hub
/// delivers to it is fed back into the negotiator.
pub struct Peer {
    pub handle: ConnectionHandle,
    pub negotiator: NegotiatorHandle,
    pub notices: mpsc::UnboundedReceiver<CallNotice>,
    pub status: watch::Receiver<CallStatus>,
    pub capture: Arc<FakeCapture>,
    pub transports: Arc<FakeFactory>,
    pub to_hub: mpsc::UnboundedSender<ClientMessage>,
}

impl Peer {
    pub async fn attach(
        hub: &Arc<SignalingHub>,
        name: &str,
        capture: FakeCapture,
        config: NegotiationConfig,
    ) -> Self {
        let handle = ConnectionHandle::from(name);
        let capture = Arc::new(capture);
        let transports = Arc::new(FakeFactory::default());

        let (to_hub, mut outgoing) = mpsc::unbounded_channel::<ClientMessage>();
        let (deliveries_tx, mut deliveries) = mpsc::unbounded_channel::<Delivery>();
        hub.connect(handle.clone(), deliveries_tx).await;

        let (negotiator, negotiator_handle, notices) = Negotiator::new(
            config,
            Arc::clone(&capture) as Arc<dyn MediaCapture>,
            Arc::clone(&transports) as Arc<dyn TransportFactory>,
            to_hub.clone(),
        );
        let status = negotiator.subscribe();
        tokio::spawn(negotiator.run());

        let uplink_hub = Arc::clone(hub);
        let uplink_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                uplink_hub.dispatch(&uplink_handle, message).await;
            }
        });

        let downlink = negotiator_handle.clone();
        tokio::spawn(async move {
            while let Some(delivery) = deliveries.recv().await {
                if downlink.deliver(delivery.message).is_err() {
                    break;
                }
            }
        });

        Self {
            handle,
            negotiator: negotiator_handle,
            notices,
            status,
            capture,
            transports,
            to_hub,
        }
    }

    pub fn join(&self, identity: &str, room: &str) {
        let request = facechat::signaling::JoinRequest::new(identity, room);
        self.to_hub
            .send(ClientMessage::JoinRoom(request))
            .expect("uplink closed");
    }

    /// Skips notices until one matches.
    pub async fn expect<F>(&mut self, mut wanted: F) -> CallNotice
    where
        F: FnMut(&CallNotice) -> bool,
    {
        tokio::time::timeout(WAIT, async {
            loop {
                let notice = self.notices.recv().await.expect("negotiator stopped");
                if wanted(&notice) {
                    return notice;
                }
            }
        })
        .await
        .expect("timed out waiting for notice")
    }

    /// Waits until the published state has the given name.
    pub async fn wait_state(&mut self, name: &str) {
        tokio::time::timeout(WAIT, async {
            loop {
                if self.status.borrow_and_update().state.name() == name {
                    return;
                }
                self.status.changed().await.expect("negotiator stopped");
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "timed out waiting for {name}, state is {}",
                self.status.borrow().state
            )
        })
    }
}

/// Polls `condition` until it holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held")
}
