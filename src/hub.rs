use crate::config::ServerConfig;
use crate::error::JoinError;
use crate::ids::{ConnectionHandle, Identity, RoomId};
use crate::registry::IdentityRegistry;
use crate::room::{Outbound, RoomRouter};
use crate::signaling::{ClientMessage, JoinRequest, ServerMessage, UserInfo};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct HubState {
    registry: IdentityRegistry,
    router: RoomRouter,
}

impl HubState {
    /// Drops the registry entry and room membership of `handle` and tells
    /// whoever is left in the room.
    fn depart(&mut self, handle: &ConnectionHandle) -> Option<RoomId> {
        let identity = self.registry.unregister(handle);
        let room = self.router.leave(handle);
        if let (Some(identity), Some(room)) = (identity, room.as_ref()) {
            let left = UserInfo {
                identity,
                handle: handle.clone(),
            };
            self.router
                .broadcast_to_room(room, handle, ServerMessage::UserLeft(left));
        }
        room
    }
}

/// Server-side signaling state: who is connected, who they are, and which
/// room they sit in.
///
/// Registry and router share one lock so every join, leave and disconnect
/// is applied atomically with respect to the others.
pub struct SignalingHub {
    state: Mutex<HubState>,
}

impl SignalingHub {
    pub fn new(room_capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(HubState {
                registry: IdentityRegistry::new(),
                router: RoomRouter::new(room_capacity),
            }),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.room_capacity)
    }

    pub async fn connect(&self, handle: ConnectionHandle, outbound: Outbound) {
        debug!(%handle, "connection attached");
        self.state.lock().await.router.attach(handle, outbound);
    }

    /// Applies one decoded client message on behalf of `from`.
    pub async fn dispatch(&self, from: &ConnectionHandle, message: ClientMessage) {
        debug!(%from, event = message.name(), "dispatching");
        match message {
            ClientMessage::JoinRoom(request) => {
                if let Err(e) = self.join(from, request).await {
                    warn!(%from, error = %e, "join rejected");
                    self.send_error(from, e.to_string()).await;
                }
            }
            ClientMessage::LeaveRoom => {
                let mut state = self.state.lock().await;
                state.depart(from);
                state.router.send(from, ServerMessage::RoomLeft);
            }
            ClientMessage::OfferCall { to, offer } => {
                let message = ServerMessage::IncomingCall {
                    from: from.clone(),
                    offer,
                };
                self.state.lock().await.router.route(from, &to, message);
            }
            ClientMessage::AnswerCall { to, answer } => {
                let message = ServerMessage::CallAccepted {
                    from: from.clone(),
                    answer,
                };
                self.state.lock().await.router.route(from, &to, message);
            }
            ClientMessage::IceCandidate { to, candidate } => {
                let message = ServerMessage::IceResponse { candidate };
                self.state.lock().await.router.route(from, &to, message);
            }
            ClientMessage::EndCall { to } => self.end_call(from, to.as_ref()).await,
        }
    }

    /// Registers the identity and adds `from` to the requested room.
    /// Returns the members that were told about the newcomer.
    pub async fn join(
        &self,
        from: &ConnectionHandle,
        request: JoinRequest,
    ) -> Result<Vec<ConnectionHandle>, JoinError> {
        let (identity, room) = request.validate()?;

        let mut state = self.state.lock().await;
        let HubState { registry, router } = &mut *state;
        registry.register(identity.clone(), from.clone())?;

        let announce = UserInfo {
            identity: identity.clone(),
            handle: from.clone(),
        };
        match router.join(room.clone(), from, announce, &request) {
            Ok(others) => {
                info!(%from, %identity, %room, "user joined room");
                Ok(others)
            }
            Err(e) => {
                registry.unregister(from);
                Err(e)
            }
        }
    }

    /// Leaves the current room, if any. Safe to call repeatedly.
    pub async fn leave(&self, from: &ConnectionHandle) -> Option<RoomId> {
        self.state.lock().await.depart(from)
    }

    /// Tells `to` the call is over and drops the sender's own registration.
    pub async fn end_call(&self, from: &ConnectionHandle, to: Option<&ConnectionHandle>) {
        let mut state = self.state.lock().await;
        if let Some(to) = to {
            state.router.route(from, to, ServerMessage::CallEnded);
        }
        state.depart(from);
    }

    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        let mut state = self.state.lock().await;
        let room = state.depart(handle);
        state.router.detach(handle);
        info!(%handle, room = ?room.as_ref().map(RoomId::as_str), "connection closed");
    }

    pub async fn send_error(&self, to: &ConnectionHandle, message: String) {
        self.state
            .lock()
            .await
            .router
            .send(to, ServerMessage::Error(message));
    }

    pub async fn identity_of(&self, handle: &ConnectionHandle) -> Option<Identity> {
        self.state.lock().await.registry.lookup(handle).cloned()
    }

    pub async fn room_of(&self, handle: &ConnectionHandle) -> Option<RoomId> {
        self.state.lock().await.router.room_of(handle).cloned()
    }

    pub async fn members(&self, room: &RoomId) -> Vec<ConnectionHandle> {
        self.state.lock().await.router.members(room)
    }

    pub async fn registered_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.router.room_count()
    }
}
