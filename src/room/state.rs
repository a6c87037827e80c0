use crate::error::JoinError;
use crate::ids::ConnectionHandle;
use std::collections::HashSet;

/// Membership of one room.
#[derive(Debug)]
pub struct Room {
    members: HashSet<ConnectionHandle>,
    max_participants: Option<usize>,
}

impl Room {
    pub fn new(max_participants: Option<usize>) -> Self {
        Self {
            members: HashSet::new(),
            max_participants,
        }
    }

    pub fn add_member(&mut self, handle: ConnectionHandle) -> Result<(), JoinError> {
        if self.members.contains(&handle) {
            return Ok(());
        }
        if let Some(max) = self.max_participants {
            if self.members.len() >= max {
                return Err(JoinError::RoomFull);
            }
        }
        self.members.insert(handle);
        Ok(())
    }

    pub fn remove_member(&mut self, handle: &ConnectionHandle) -> bool {
        self.members.remove(handle)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.members.iter()
    }

    /// Every member except `handle`.
    pub fn others<'a>(
        &'a self,
        handle: &'a ConnectionHandle,
    ) -> impl Iterator<Item = &'a ConnectionHandle> + 'a {
        self.members.iter().filter(move |member| *member != handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_enforced() {
        let mut room = Room::new(Some(2));
        room.add_member(ConnectionHandle::from("a")).unwrap();
        room.add_member(ConnectionHandle::from("b")).unwrap();

        assert_eq!(
            room.add_member(ConnectionHandle::from("c")),
            Err(JoinError::RoomFull)
        );
        assert_eq!(room.len(), 2);
    }

    #[test]
    fn uncapped_room_grows() {
        let mut room = Room::new(None);
        for name in ["a", "b", "c", "d"] {
            room.add_member(ConnectionHandle::from(name)).unwrap();
        }
        assert_eq!(room.len(), 4);
    }

    #[test]
    fn others_excludes_the_given_member() {
        let mut room = Room::new(None);
        let a = ConnectionHandle::from("a");
        let b = ConnectionHandle::from("b");
        room.add_member(a.clone()).unwrap();
        room.add_member(b.clone()).unwrap();

        let others: Vec<_> = room.others(&a).cloned().collect();
        assert_eq!(others, vec![b]);
    }
}
