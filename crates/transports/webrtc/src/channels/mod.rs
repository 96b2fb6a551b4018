//! Data channel abstraction and the echo handler
//!
//! Sessions surface inbound data channels as [`DataChannel`] handles. The
//! webrtc-rs implementation lives in [`data_channel`]; [`echo`] attaches the
//! echo behaviour to every channel a remote peer opens.

pub mod data_channel;
pub mod echo;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

pub use data_channel::RtcDataChannel;
pub use echo::EchoChannelHandler;

/// One data channel message
///
/// Text and binary frames are kept apart so an echo goes back with the framing
/// it arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelPayload {
    Text(Bytes),
    Binary(Bytes),
}

impl DataChannelPayload {
    pub fn data(&self) -> &Bytes {
        match self {
            DataChannelPayload::Text(data) | DataChannelPayload::Binary(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, DataChannelPayload::Text(_))
    }
}

/// Callback invoked once when a channel opens
pub type OpenHandler = Box<dyn FnOnce() + Send + Sync>;

/// Callback invoked per inbound message
///
/// The engine awaits each returned future before delivering the next message
/// on the same channel.
pub type MessageHandler = Box<dyn FnMut(DataChannelPayload) -> BoxFuture<'static, ()> + Send + Sync>;

/// An application message channel multiplexed over a session
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    /// Numeric stream identifier
    fn id(&self) -> u16;

    fn on_open(&self, handler: OpenHandler);

    fn on_message(&self, handler: MessageHandler);

    /// Send a payload, returning the number of bytes written
    async fn send(&self, payload: DataChannelPayload) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessors() {
        let text = DataChannelPayload::Text(Bytes::from_static(b"hello"));
        assert!(text.is_text());
        assert_eq!(text.len(), 5);
        assert_eq!(text.data().as_ref(), b"hello");

        let binary = DataChannelPayload::Binary(Bytes::new());
        assert!(!binary.is_text());
        assert!(binary.is_empty());
    }
}
