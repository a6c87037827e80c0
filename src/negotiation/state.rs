use crate::ids::ConnectionHandle;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Where one client stands in negotiating a call with one remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    IncomingCallReceived {
        peer: ConnectionHandle,
    },
    MediaAcquiring {
        peer: ConnectionHandle,
        role: CallRole,
    },
    Offering {
        peer: ConnectionHandle,
    },
    AwaitingAnswer {
        peer: ConnectionHandle,
    },
    Answering {
        peer: ConnectionHandle,
    },
    Connected {
        peer: ConnectionHandle,
        role: CallRole,
    },
    Ended,
}

impl NegotiationState {
    pub fn peer(&self) -> Option<&ConnectionHandle> {
        match self {
            NegotiationState::Idle | NegotiationState::Ended => None,
            NegotiationState::IncomingCallReceived { peer }
            | NegotiationState::MediaAcquiring { peer, .. }
            | NegotiationState::Offering { peer }
            | NegotiationState::AwaitingAnswer { peer }
            | NegotiationState::Answering { peer }
            | NegotiationState::Connected { peer, .. } => Some(peer),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, NegotiationState::Idle)
    }

    /// States in which the transport exists (or is being built) and local
    /// ICE candidates are relayed to the peer, once our description is out.
    pub fn trickles_candidates(&self) -> bool {
        matches!(
            self,
            NegotiationState::Offering { .. }
                | NegotiationState::AwaitingAnswer { .. }
                | NegotiationState::Answering { .. }
                | NegotiationState::Connected { .. }
        )
    }

    /// Still waiting on the remote side to complete the exchange.
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            NegotiationState::Offering { .. }
                | NegotiationState::AwaitingAnswer { .. }
                | NegotiationState::Answering { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            NegotiationState::Idle => "Idle",
            NegotiationState::IncomingCallReceived { .. } => "IncomingCallReceived",
            NegotiationState::MediaAcquiring { .. } => "MediaAcquiring",
            NegotiationState::Offering { .. } => "Offering",
            NegotiationState::AwaitingAnswer { .. } => "AwaitingAnswer",
            NegotiationState::Answering { .. } => "Answering",
            NegotiationState::Connected { .. } => "Connected",
            NegotiationState::Ended => "Ended",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer() {
            Some(peer) => write!(f, "{}({})", self.name(), peer),
            None => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_peer() {
        let state = NegotiationState::Offering {
            peer: ConnectionHandle::from("bob"),
        };
        assert_eq!(state.to_string(), "Offering(bob)");
        assert_eq!(NegotiationState::Idle.to_string(), "Idle");
    }

    #[test]
    fn media_acquiring_does_not_trickle() {
        let state = NegotiationState::MediaAcquiring {
            peer: ConnectionHandle::from("bob"),
            role: CallRole::Caller,
        };
        assert!(!state.trickles_candidates());
        assert!(!state.is_negotiating());
    }
}
