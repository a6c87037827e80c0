use super::machine::NegotiationEvent;
use super::media::LocalTrack;
use crate::error::Result;
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::track::track_remote::TrackRemote;

/// One peer-to-peer media transport for a single call attempt.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: LocalTrack) -> Result<()>;
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Builds a fresh [`PeerTransport`] per call attempt.
///
/// The transport reports what happens on the wire through `events`; events
/// from an abandoned attempt are discarded by the negotiator.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, events: TransportEvents) -> Result<Arc<dyn PeerTransport>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Unknown,
}

/// Media arriving from the remote peer.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
    /// The underlying track when the transport is backed by `webrtc`
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Callback sink handed to a transport, bound to one call attempt.
#[derive(Clone)]
pub struct TransportEvents {
    attempt: u64,
    tx: mpsc::UnboundedSender<NegotiationEvent>,
}

impl TransportEvents {
    pub(crate) fn new(attempt: u64, tx: mpsc::UnboundedSender<NegotiationEvent>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        let _ = self.tx.send(NegotiationEvent::LocalCandidate {
            attempt: self.attempt,
            candidate,
        });
    }

    pub fn remote_track(&self, track: RemoteTrack) {
        let _ = self.tx.send(NegotiationEvent::RemoteTrack {
            attempt: self.attempt,
            track,
        });
    }

    pub fn failed(&self, reason: impl Into<String>) {
        let _ = self.tx.send(NegotiationEvent::TransportFailed {
            attempt: self.attempt,
            reason: reason.into(),
        });
    }
}
