//! Session lifecycle observer
//!
//! Engine callbacks only enqueue [`SessionEvent`]s; a per-session task drains
//! the queue and performs the registry work. Callbacks therefore never block
//! and never take the registry lock, even when the engine invokes them from
//! inside `close()`.

use super::{
    IceConnectionState, PeerConnectionState, PeerSession, SessionId, SessionRegistry,
    SignalingState,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notification raised by the engine for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    IceConnectionStateChanged(IceConnectionState),
    /// `None` marks the end of candidate gathering
    CandidateDiscovered(Option<String>),
    ConnectionStateChanged(PeerConnectionState),
    SignalingStateChanged(SignalingState),
}

/// Drives registry cleanup and diagnostics from session state changes
///
/// ICE "failed" is the only automatic teardown trigger.
#[derive(Clone)]
pub struct LifecycleObserver {
    registry: Arc<SessionRegistry>,
    diagnostics: bool,
}

impl LifecycleObserver {
    pub fn new(registry: Arc<SessionRegistry>, diagnostics: bool) -> Self {
        Self {
            registry,
            diagnostics,
        }
    }

    /// Wire the four notification streams of `session` into a lifecycle task.
    ///
    /// The task keeps only the session id; it ends once the engine drops the
    /// callbacks.
    pub fn attach(&self, session: &dyn PeerSession) -> JoinHandle<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tx = events_tx.clone();
        session.on_ice_connection_state_change(Box::new(move |state| {
            let _ = tx.send(SessionEvent::IceConnectionStateChanged(state));
        }));

        let tx = events_tx.clone();
        session.on_ice_candidate(Box::new(move |candidate| {
            let _ = tx.send(SessionEvent::CandidateDiscovered(candidate));
        }));

        let tx = events_tx.clone();
        session.on_connection_state_change(Box::new(move |state| {
            let _ = tx.send(SessionEvent::ConnectionStateChanged(state));
        }));

        let tx = events_tx;
        session.on_signaling_state_change(Box::new(move |state| {
            let _ = tx.send(SessionEvent::SignalingStateChanged(state));
        }));

        let observer = self.clone();
        let session_id = session.id();
        tokio::spawn(async move { observer.run(session_id, events_rx).await })
    }

    async fn run(self, session_id: SessionId, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(session_id, event).await;
        }
        debug!(session_id = %session_id, "Lifecycle task finished");
    }

    /// React to a single event
    pub async fn handle_event(&self, session_id: SessionId, event: SessionEvent) {
        match event {
            SessionEvent::IceConnectionStateChanged(state) => {
                debug!(session_id = %session_id, "ICE connection state has changed to {}", state);

                if state == IceConnectionState::Failed {
                    match self.registry.remove_and_close_id(session_id).await {
                        Ok(Some(_)) => info!(session_id = %session_id, "Session removed after ICE failure"),
                        Ok(None) => debug!(session_id = %session_id, "Session already removed"),
                        Err(e) => warn!(session_id = %session_id, "{}", e),
                    }
                }
            }
            SessionEvent::CandidateDiscovered(Some(candidate)) => {
                debug!(session_id = %session_id, "New ICE candidate: {}", candidate);
            }
            SessionEvent::CandidateDiscovered(None) => {
                debug!(session_id = %session_id, "Gathering is complete");
            }
            SessionEvent::ConnectionStateChanged(state) => {
                debug!(session_id = %session_id, "Peer connection state has changed to {}", state);

                if state.is_terminal() && self.diagnostics {
                    self.registry.log_sessions().await;
                }
            }
            SessionEvent::SignalingStateChanged(state) => {
                debug!(session_id = %session_id, "Signaling state has changed to {}", state);
            }
        }
    }
}
