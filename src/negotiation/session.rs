use super::media::LocalStream;
use super::transport::PeerTransport;
use crate::signaling::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tracing::debug;

/// Resources held by the call currently being negotiated.
#[derive(Default)]
pub struct NegotiationSession {
    /// Offer received with `incoming-call`, consumed when answering
    pub remote_offer: Option<SessionDescription>,
    pub stream: Option<Box<dyn LocalStream>>,
    pub transport: Option<Arc<dyn PeerTransport>>,
    /// Remote candidates held until the remote description is committed
    pub pending_candidates: Vec<IceCandidate>,
    /// Local candidates gathered before our offer or answer went out
    pub local_candidates: Vec<IceCandidate>,
    pub description_sent: bool,
}

impl NegotiationSession {
    /// Stops local media and closes the transport, leaving the session empty.
    pub fn release(&mut self) {
        self.remote_offer = None;
        self.pending_candidates.clear();
        self.local_candidates.clear();
        self.description_sent = false;
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        if let Some(transport) = self.transport.take() {
            close_transport(transport);
        }
    }
}

pub(crate) fn close_transport(transport: Arc<dyn PeerTransport>) {
    tokio::spawn(async move {
        if let Err(e) = transport.close().await {
            debug!(error = %e, "transport close failed");
        }
    });
}
