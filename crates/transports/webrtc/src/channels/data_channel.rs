//! webrtc-rs data channel adapter

use super::{DataChannel, DataChannelPayload, MessageHandler, OpenHandler};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

/// Wraps an inbound [`RTCDataChannel`]
pub struct RtcDataChannel {
    rtc_channel: Arc<RTCDataChannel>,
}

impl RtcDataChannel {
    /// Wrap a channel received from the remote peer
    pub fn from_rtc_channel(rtc_channel: Arc<RTCDataChannel>) -> Self {
        let label = rtc_channel.label().to_string();
        rtc_channel.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!("Data channel '{}' error: {}", label, err);
            })
        }));

        Self { rtc_channel }
    }
}

impl From<DataChannelMessage> for DataChannelPayload {
    fn from(msg: DataChannelMessage) -> Self {
        if msg.is_string {
            DataChannelPayload::Text(msg.data)
        } else {
            DataChannelPayload::Binary(msg.data)
        }
    }
}

#[async_trait]
impl DataChannel for RtcDataChannel {
    fn label(&self) -> String {
        self.rtc_channel.label().to_string()
    }

    fn id(&self) -> u16 {
        self.rtc_channel.id()
    }

    fn on_open(&self, handler: OpenHandler) {
        self.rtc_channel.on_open(Box::new(move || {
            handler();
            Box::pin(async {})
        }));
    }

    fn on_message(&self, mut handler: MessageHandler) {
        self.rtc_channel
            .on_message(Box::new(move |msg: DataChannelMessage| handler(msg.into())));
    }

    async fn send(&self, payload: DataChannelPayload) -> Result<usize> {
        let sent = match payload {
            DataChannelPayload::Text(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => self.rtc_channel.send_text(text).await,
                // Not valid UTF-8, send the raw bytes
                Err(_) => self.rtc_channel.send(&data).await,
            },
            DataChannelPayload::Binary(data) => self.rtc_channel.send(&data).await,
        };

        sent.map_err(|e| Error::EchoSendFailed(e.to_string()))
    }
}
