//! Room-based signaling for one-to-one video calls.
//!
//! The server side ([`SignalingServer`] over a [`SignalingHub`]) maps
//! connections to identities, groups them into rooms and relays call setup
//! messages between them. The client side ([`negotiation::Negotiator`])
//! drives a single peer transport through offer/answer and ICE exchange.

pub mod config;
pub mod error;
pub mod hub;
pub mod ids;
pub mod logging;
pub mod negotiation;
pub mod registry;
pub mod room;
pub mod rtc;
pub mod server;
pub mod signaling;

pub use config::{MediaConstraints, NegotiationConfig, ServerConfig};
pub use error::{Error, JoinError, Result};
pub use hub::SignalingHub;
pub use ids::{ConnectionHandle, Identity, RoomId};
pub use server::SignalingServer;
pub use signaling::{ClientMessage, ServerMessage, SignalingClient};
