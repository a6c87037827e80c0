use crate::error::JoinError;
use crate::ids::{ConnectionHandle, Identity};
use std::collections::HashMap;

/// Two-way map between identities and the connection currently using them.
///
/// Both maps are updated together in every mutation, so a lookup in either
/// direction always agrees with the other.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    by_identity: HashMap<Identity, ConnectionHandle>,
    by_handle: HashMap<ConnectionHandle, Identity>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        identity: Identity,
        handle: ConnectionHandle,
    ) -> Result<(), JoinError> {
        if self.by_identity.contains_key(&identity) {
            return Err(JoinError::AlreadyRegistered);
        }
        if self.by_handle.contains_key(&handle) {
            return Err(JoinError::AlreadyJoined);
        }
        self.by_identity.insert(identity.clone(), handle.clone());
        self.by_handle.insert(handle, identity);
        Ok(())
    }

    /// Removes whatever identity `handle` holds. No-op if it holds none.
    pub fn unregister(&mut self, handle: &ConnectionHandle) -> Option<Identity> {
        let identity = self.by_handle.remove(handle)?;
        self.by_identity.remove(&identity);
        Some(identity)
    }

    pub fn lookup(&self, handle: &ConnectionHandle) -> Option<&Identity> {
        self.by_handle.get(handle)
    }

    pub fn handle_of(&self, identity: &Identity) -> Option<&ConnectionHandle> {
        self.by_identity.get(identity)
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }

    #[cfg(test)]
    fn is_mirrored(&self) -> bool {
        self.by_identity.len() == self.by_handle.len()
            && self
                .by_identity
                .iter()
                .all(|(identity, handle)| self.by_handle.get(handle) == Some(identity))
    }
}
