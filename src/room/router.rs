use super::state::Room;
use crate::error::JoinError;
use crate::ids::{ConnectionHandle, RoomId};
use crate::signaling::{JoinRequest, ServerMessage, UserInfo};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A message addressed to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: ConnectionHandle,
    pub message: ServerMessage,
}

pub type Outbound = mpsc::UnboundedSender<Delivery>;

/// Tracks live connections and room membership, and relays messages
/// between them.
///
/// Every connected handle has an outbound queue here whether or not it has
/// joined a room; directed messages only need the target to be connected.
#[derive(Debug)]
pub struct RoomRouter {
    peers: HashMap<ConnectionHandle, Outbound>,
    rooms: HashMap<RoomId, Room>,
    memberships: HashMap<ConnectionHandle, RoomId>,
    room_capacity: Option<usize>,
}

impl RoomRouter {
    pub fn new(room_capacity: Option<usize>) -> Self {
        Self {
            peers: HashMap::new(),
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            room_capacity,
        }
    }

    pub fn attach(&mut self, handle: ConnectionHandle, outbound: Outbound) {
        self.peers.insert(handle, outbound);
    }

    /// Forgets a connection entirely, leaving its room first.
    pub fn detach(&mut self, handle: &ConnectionHandle) -> Option<RoomId> {
        let room = self.leave(handle);
        self.peers.remove(handle);
        room
    }

    pub fn is_attached(&self, handle: &ConnectionHandle) -> bool {
        self.peers.contains_key(handle)
    }

    /// Adds `handle` to `room`, announces it to the existing members and
    /// then confirms to the joiner. Returns the members that were announced
    /// to.
    pub fn join(
        &mut self,
        room: RoomId,
        handle: &ConnectionHandle,
        announce: UserInfo,
        payload: &JoinRequest,
    ) -> Result<Vec<ConnectionHandle>, JoinError> {
        if self.memberships.contains_key(handle) {
            return Err(JoinError::AlreadyJoined);
        }

        let others: Vec<ConnectionHandle> = {
            let capacity = self.room_capacity;
            let entry = self
                .rooms
                .entry(room.clone())
                .or_insert_with(|| Room::new(capacity));
            if let Err(e) = entry.add_member(handle.clone()) {
                if entry.is_empty() {
                    self.rooms.remove(&room);
                }
                return Err(e);
            }
            entry.others(handle).cloned().collect()
        };
        self.memberships.insert(handle.clone(), room.clone());

        for other in &others {
            self.send(other, ServerMessage::UserJoined(announce.clone()));
        }
        self.send(handle, ServerMessage::RoomJoined(payload.clone()));

        debug!(%handle, %room, members = others.len() + 1, "joined room");
        Ok(others)
    }

    /// Removes `handle` from its room, reclaiming the room once empty.
    /// Returns the room it left, if it was in one.
    pub fn leave(&mut self, handle: &ConnectionHandle) -> Option<RoomId> {
        let room_id = self.memberships.remove(handle)?;
        if let Some(room) = self.rooms.get_mut(&room_id) {
            room.remove_member(handle);
            if room.is_empty() {
                self.rooms.remove(&room_id);
                debug!(room = %room_id, "room reclaimed");
            }
        }
        debug!(%handle, room = %room_id, "left room");
        Some(room_id)
    }

    /// Delivers `message` to `to` if it is still connected. Unknown targets
    /// are dropped without telling `from`.
    pub fn route(
        &self,
        from: &ConnectionHandle,
        to: &ConnectionHandle,
        message: ServerMessage,
    ) -> bool {
        let delivered = self.send(to, message);
        if !delivered {
            debug!(%from, %to, "dropping message for unknown connection");
        }
        delivered
    }

    /// Delivers `message` to every member of `room` except `from`.
    pub fn broadcast_to_room(
        &self,
        room: &RoomId,
        from: &ConnectionHandle,
        message: ServerMessage,
    ) -> usize {
        let Some(room) = self.rooms.get(room) else {
            return 0;
        };
        room.others(from)
            .filter(|member| self.send(member, message.clone()))
            .count()
    }

    pub fn send(&self, to: &ConnectionHandle, message: ServerMessage) -> bool {
        let Some(outbound) = self.peers.get(to) else {
            return false;
        };
        trace!(%to, event = message.name(), "queueing message");
        outbound
            .send(Delivery {
                to: to.clone(),
                message,
            })
            .is_ok()
    }

    pub fn room_of(&self, handle: &ConnectionHandle) -> Option<&RoomId> {
        self.memberships.get(handle)
    }

    pub fn members(&self, room: &RoomId) -> Vec<ConnectionHandle> {
        let mut members: Vec<_> = self
            .rooms
            .get(room)
            .map(|room| room.members().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Identity;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn h(s: &str) -> ConnectionHandle {
        ConnectionHandle::from(s)
    }

    fn info(identity: &str, handle: &str) -> UserInfo {
        UserInfo {
            identity: Identity::from(identity),
            handle: h(handle),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Delivery>) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(d) = rx.try_recv() {
            out.push(d);
        }
        out
    }

    fn router_with(handles: &[&str]) -> (RoomRouter, UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut router = RoomRouter::new(None);
        for handle in handles {
            router.attach(h(handle), tx.clone());
        }
        (router, rx)
    }

    #[test]
    fn join_announces_before_confirming() {
        let (mut router, mut rx) = router_with(&["a", "b"]);
        let room = RoomId::from("100");

        let a_req = JoinRequest::new("a@x.com", "100");
        assert!(router
            .join(room.clone(), &h("a"), info("a@x.com", "a"), &a_req)
            .unwrap()
            .is_empty());
        drain(&mut rx);

        let b_req = JoinRequest::new("b@x.com", "100");
        let others = router
            .join(room.clone(), &h("b"), info("b@x.com", "b"), &b_req)
            .unwrap();
        assert_eq!(others, vec![h("a")]);

        assert_eq!(
            drain(&mut rx),
            vec![
                Delivery {
                    to: h("a"),
                    message: ServerMessage::UserJoined(info("b@x.com", "b")),
                },
                Delivery {
                    to: h("b"),
                    message: ServerMessage::RoomJoined(b_req),
                },
            ]
        );
    }

    #[test]
    fn full_room_rejects_without_side_effects() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut router = RoomRouter::new(Some(1));
        router.attach(h("a"), tx.clone());
        router.attach(h("b"), tx);
        let room = RoomId::from("100");

        router
            .join(room.clone(), &h("a"), info("a", "a"), &JoinRequest::new("a", "100"))
            .unwrap();
        drain(&mut rx);

        assert_eq!(
            router.join(room.clone(), &h("b"), info("b", "b"), &JoinRequest::new("b", "100")),
            Err(JoinError::RoomFull)
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(router.room_of(&h("b")), None);
        assert_eq!(router.members(&room), vec![h("a")]);
    }

    #[test]
    fn leaving_last_member_reclaims_room() {
        let (mut router, _rx) = router_with(&["a"]);
        let room = RoomId::from("100");
        router
            .join(room.clone(), &h("a"), info("a", "a"), &JoinRequest::new("a", "100"))
            .unwrap();
        assert_eq!(router.room_count(), 1);

        assert_eq!(router.leave(&h("a")), Some(room));
        assert_eq!(router.room_count(), 0);
        assert_eq!(router.leave(&h("a")), None);
    }

    #[test]
    fn route_to_unknown_handle_is_dropped() {
        let (router, mut rx) = router_with(&["a"]);
        assert!(!router.route(&h("a"), &h("ghost"), ServerMessage::CallEnded));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn broadcast_skips_sender() {
        let (mut router, mut rx) = router_with(&["a", "b", "c"]);
        let room = RoomId::from("9");
        for name in ["a", "b", "c"] {
            router
                .join(room.clone(), &h(name), info(name, name), &JoinRequest::new(name, "9"))
                .unwrap();
        }
        drain(&mut rx);

        let sent = router.broadcast_to_room(&room, &h("b"), ServerMessage::CallEnded);
        assert_eq!(sent, 2);
        let mut targets: Vec<_> = drain(&mut rx).into_iter().map(|d| d.to).collect();
        targets.sort();
        assert_eq!(targets, vec![h("a"), h("c")]);
    }

    #[test]
    fn detach_removes_route_and_membership() {
        let (mut router, mut rx) = router_with(&["a", "b"]);
        let room = RoomId::from("1");
        router
            .join(room.clone(), &h("a"), info("a", "a"), &JoinRequest::new("a", "1"))
            .unwrap();

        assert_eq!(router.detach(&h("a")), Some(room));
        assert!(!router.is_attached(&h("a")));
        drain(&mut rx);
        assert!(!router.route(&h("b"), &h("a"), ServerMessage::CallEnded));
    }
}
