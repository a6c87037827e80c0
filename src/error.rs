use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

/// Reasons a `join-room` request is refused.
///
/// The `Display` text is what the originating client receives in the
/// `error` message, so keep it user-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Identity and room number are required.")]
    MissingField,
    #[error("User already in a room.")]
    AlreadyRegistered,
    #[error("Connection already joined a room.")]
    AlreadyJoined,
    #[error("Room is full.")]
    RoomFull,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Join rejected: {0}")]
    Join(#[from] JoinError),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
