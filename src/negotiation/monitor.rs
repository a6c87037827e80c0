use super::state::NegotiationState;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStatus {
    pub state: NegotiationState,
    pub last_error: Option<String>,
}

/// Publishes the negotiator's status to anyone holding a receiver.
#[derive(Clone)]
pub struct CallMonitor {
    status: Arc<watch::Sender<CallStatus>>,
    receiver: watch::Receiver<CallStatus>,
}

impl CallMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(CallStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn update_state(&self, state: NegotiationState) {
        self.status.send_modify(|status| {
            // A fresh call clears whatever went wrong with the last one.
            if matches!(state, NegotiationState::MediaAcquiring { .. }) {
                status.last_error = None;
            }
            status.state = state;
        });
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.status.send_modify(|status| {
            status.last_error = Some(error);
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.receiver.clone()
    }

    pub fn current(&self) -> CallStatus {
        self.receiver.borrow().clone()
    }
}

impl Default for CallMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ConnectionHandle;
    use crate::negotiation::state::CallRole;

    #[test]
    fn new_call_clears_last_error() {
        let monitor = CallMonitor::new();
        monitor.set_error("camera unavailable");
        assert_eq!(
            monitor.current().last_error.as_deref(),
            Some("camera unavailable")
        );

        monitor.update_state(NegotiationState::MediaAcquiring {
            peer: ConnectionHandle::from("bob"),
            role: CallRole::Caller,
        });
        assert_eq!(monitor.current().last_error, None);
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let monitor = CallMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.update_state(NegotiationState::Ended);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, NegotiationState::Ended);
    }
}
