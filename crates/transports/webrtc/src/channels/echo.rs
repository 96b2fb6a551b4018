//! Echo handler for inbound data channels

use super::{DataChannel, DataChannelPayload};
use crate::peer::{PeerSession, SessionId};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Writes every message received on a data channel back to its sender
///
/// Payloads are never inspected. A failed echo is logged and dropped; it does
/// not close the channel or the session.
pub struct EchoChannelHandler;

impl EchoChannelHandler {
    /// Accept every data channel the remote peer opens on `session`
    pub fn attach(session: &dyn PeerSession) {
        let session_id = session.id();
        session.on_data_channel(Box::new(move |channel: Arc<dyn DataChannel>| {
            Self::accept(session_id, &channel);
        }));
    }

    /// Install the echo on a single channel
    pub fn accept(session_id: SessionId, channel: &Arc<dyn DataChannel>) {
        let label = channel.label();
        let id = channel.id();
        debug!(session_id = %session_id, "New data channel {} {}", label, id);

        let open_label = label.clone();
        channel.on_open(Box::new(move || {
            debug!(session_id = %session_id, "Data channel '{}'-'{}' open", open_label, id);
        }));

        let weak: Weak<dyn DataChannel> = Arc::downgrade(channel);
        channel.on_message(Box::new(move |payload: DataChannelPayload| {
            let weak = weak.clone();
            let label = label.clone();
            Box::pin(async move {
                let Some(channel) = weak.upgrade() else {
                    debug!(session_id = %session_id, "Data channel '{}' dropped before echo", label);
                    return;
                };

                debug!(
                    session_id = %session_id,
                    "Message from data channel '{}': {} bytes",
                    label,
                    payload.len()
                );

                if let Err(e) = channel.send(payload).await {
                    warn!(session_id = %session_id, "Echo on data channel '{}' failed: {}", label, e);
                }
            })
        }));
    }
}
