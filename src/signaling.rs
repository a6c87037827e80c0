use crate::error::{Error, JoinError, Result};
use crate::ids::{ConnectionHandle, Identity, RoomId};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const INCOMING_CAPACITY: usize = 100;

/// Payload of `join-room`, echoed back verbatim in `room-joined`.
///
/// Missing fields decode as empty strings so that validation, not the
/// decoder, reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(default, alias = "email")]
    pub identity: String,
    #[serde(default, alias = "roomNo")]
    pub room: String,
}

impl JoinRequest {
    pub fn new(identity: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            room: room.into(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(Identity, RoomId), JoinError> {
        let identity = self.identity.trim();
        let room = self.room.trim();
        if identity.is_empty() || room.is_empty() {
            return Err(JoinError::MissingField);
        }
        Ok((Identity::from(identity), RoomId::from(room)))
    }
}

/// Who joined or left a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub identity: Identity,
    #[serde(alias = "id")]
    pub handle: ConnectionHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description in the `{type, sdp}` shape browsers produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages a client sends to the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom(JoinRequest),
    LeaveRoom,
    OfferCall {
        to: ConnectionHandle,
        offer: SessionDescription,
    },
    AnswerCall {
        to: ConnectionHandle,
        answer: SessionDescription,
    },
    IceCandidate {
        to: ConnectionHandle,
        candidate: IceCandidate,
    },
    EndCall {
        #[serde(default)]
        to: Option<ConnectionHandle>,
    },
}

/// Messages the signaling server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    RoomJoined(JoinRequest),
    UserJoined(UserInfo),
    UserLeft(UserInfo),
    RoomLeft,
    Error(String),
    IncomingCall {
        from: ConnectionHandle,
        offer: SessionDescription,
    },
    CallAccepted {
        from: ConnectionHandle,
        answer: SessionDescription,
    },
    IceResponse {
        candidate: IceCandidate,
    },
    CallEnded,
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom(_) => "join-room",
            ClientMessage::LeaveRoom => "leave-room",
            ClientMessage::OfferCall { .. } => "offer-call",
            ClientMessage::AnswerCall { .. } => "answer-call",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
            ClientMessage::EndCall { .. } => "end-call",
        }
    }
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::RoomJoined(_) => "room-joined",
            ServerMessage::UserJoined(_) => "user-joined",
            ServerMessage::UserLeft(_) => "user-left",
            ServerMessage::RoomLeft => "room-left",
            ServerMessage::Error(_) => "error",
            ServerMessage::IncomingCall { .. } => "incoming-call",
            ServerMessage::CallAccepted { .. } => "call-accepted",
            ServerMessage::IceResponse { .. } => "ice-response",
            ServerMessage::CallEnded => "call-ended",
        }
    }
}

/// WebSocket connection to the signaling server.
///
/// Outgoing messages are queued on an unbounded channel so that the
/// negotiator can hold a cheap sender clone; incoming ones are decoded once
/// here and handed out typed.
pub struct SignalingClient {
    tx: mpsc::UnboundedSender<ClientMessage>,
    rx: mpsc::Receiver<ServerMessage>,
    writer: JoinHandle<()>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();
        debug!(url, "signaling websocket connected");

        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();

        // Handle outgoing messages
        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match msg.encode() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(event = msg.name(), error = %e, "failed to encode signaling message");
                        continue;
                    }
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming messages
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::decode(&text) {
                        Ok(signal) => {
                            if tx.send(signal).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "ignoring undecodable server message"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "signaling websocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            tx: outgoing_tx,
            rx,
            writer,
        })
    }

    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|e| Error::Signaling(format!("Failed to send message: {}", e)))
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.tx.clone()
    }

    /// Next message from the server, or `None` once the socket has closed.
    pub async fn receive(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    /// Flushes queued messages and closes the socket once every sender
    /// handed out by [`sender`](Self::sender) has been dropped.
    pub async fn close(self) {
        let Self { tx, writer, .. } = self;
        drop(tx);
        let _ = writer.await;
    }
}
