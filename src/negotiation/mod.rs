//! Client-side peer negotiation: one state machine per local user that turns
//! UI commands and signaling messages into an established peer transport.

mod machine;
mod media;
mod monitor;
mod session;
mod state;
mod transport;

pub use machine::{CallNotice, EndReason, NegotiationEvent, Negotiator, NegotiatorHandle};
pub use media::{LocalStream, LocalTrack, MediaCapture, StaticTrackCapture};
pub use monitor::{CallMonitor, CallStatus};
pub use session::NegotiationSession;
pub use state::{CallRole, NegotiationState};
pub use transport::{MediaKind, PeerTransport, RemoteTrack, TransportEvents, TransportFactory};
