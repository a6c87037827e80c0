use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_ROOM_CAPACITY: usize = 2;

/// Signaling server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: SocketAddr,
    /// Maximum members per room; `None` relays between any number
    pub room_capacity: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            room_capacity: Some(DEFAULT_ROOM_CAPACITY),
        }
    }
}

/// Which kinds of local media a call asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Client-side negotiation configuration
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    /// STUN/TURN URLs handed to the peer transport
    pub ice_servers: Vec<String>,
    pub constraints: MediaConstraints,
    /// How long an offer or answer may stay outstanding; `None` waits forever
    pub negotiation_timeout: Option<Duration>,
    /// Accept incoming calls without waiting for the UI
    pub auto_accept: bool,
    /// Send `leave-room` whenever a call ends
    pub leave_room_on_end: bool,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_owned()],
            constraints: MediaConstraints::default(),
            negotiation_timeout: Some(Duration::from_secs(30)),
            auto_accept: false,
            leave_room_on_end: true,
        }
    }
}
