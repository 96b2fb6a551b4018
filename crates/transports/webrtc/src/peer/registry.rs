//! Registry of active sessions

use super::{PeerSession, SessionId};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Concurrency-safe collection of active sessions
///
/// Membership and close are changed together under the write lock, so a
/// session can neither be closed twice nor closed after removal. Lookups scan
/// linearly; expected sizes are in the low hundreds.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<Vec<Arc<dyn PeerSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session
    pub async fn add(&self, session: Arc<dyn PeerSession>) {
        let mut sessions = self.sessions.write().await;
        debug!(session_id = %session.id(), "Registering session");
        sessions.push(session);
    }

    /// Remove and close the first session matching `predicate`.
    ///
    /// Returns the id of the removed session, or `None` when nothing matched.
    /// If close fails the session is still removed and
    /// [`Error::CloseFailed`] is returned.
    pub async fn remove_and_close<P>(&self, predicate: P) -> Result<Option<SessionId>>
    where
        P: Fn(&dyn PeerSession) -> bool,
    {
        let mut sessions = self.sessions.write().await;

        let Some(index) = sessions.iter().position(|s| predicate(s.as_ref())) else {
            return Ok(None);
        };

        let session = sessions.remove(index);
        let id = session.id();
        info!(session_id = %id, remaining = sessions.len(), "Removing session");

        session.close().await.map_err(|e| match e {
            Error::CloseFailed(msg) => Error::CloseFailed(format!("session {}: {}", id, msg)),
            other => Error::CloseFailed(format!("session {}: {}", id, other)),
        })?;

        Ok(Some(id))
    }

    /// Remove and close the session with the given identity
    pub async fn remove_and_close_id(&self, id: SessionId) -> Result<Option<SessionId>> {
        self.remove_and_close(|s| s.id() == id).await
    }

    /// Point-in-time copy of the members in registration order.
    ///
    /// For diagnostics only.
    pub async fn snapshot(&self) -> Vec<Arc<dyn PeerSession>> {
        self.sessions.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.iter().any(|s| s.id() == id)
    }

    /// Log every active session at debug level
    pub async fn log_sessions(&self) {
        let sessions = self.snapshot().await;
        debug!("Active sessions: {}", sessions.len());
        for session in sessions {
            debug!(
                session_id = %session.id(),
                state = %session.connection_state(),
                data_channels = session.data_channels().len(),
                "Active session"
            );
        }
    }

    /// Remove and close every session. Close failures are logged.
    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();

        for session in sessions.drain(..) {
            if let Err(e) = session.close().await {
                warn!(session_id = %session.id(), "Error closing session: {}", e);
            }
        }

        if count > 0 {
            info!("Closed {} sessions", count);
        }
        count
    }
}
