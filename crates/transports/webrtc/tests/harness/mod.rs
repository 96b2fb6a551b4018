//! Client-side harness for end-to-end echo tests
//!
//! Wraps a real webrtc-rs peer connection acting as the remote peer, and
//! drives the server router in-process.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc_echo::{SdpType, SessionDescription};

/// Harness errors
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Initialize tracing for tests (call once per test)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,webrtc=warn,webrtc_echo=debug")
        .try_init();
}

/// One inbound message as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub is_string: bool,
    pub data: Bytes,
}

/// A remote peer with one data channel
pub struct EchoClient {
    peer_connection: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    opened: Mutex<mpsc::Receiver<()>>,
    received: Mutex<mpsc::UnboundedReceiver<ReceivedMessage>>,
}

impl EchoClient {
    /// Create a peer with a data channel labelled `label`
    pub async fn new(label: &str) -> HarnessResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let mut settings = SettingEngine::default();
        settings.set_include_loopback_candidate(true);

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build();

        let peer_connection = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await?);
        let channel = peer_connection.create_data_channel(label, None).await?;

        let (open_tx, open_rx) = mpsc::channel(1);
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                let _ = open_tx.send(()).await;
            })
        }));

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let _ = msg_tx.send(ReceivedMessage {
                is_string: msg.is_string,
                data: msg.data,
            });
            Box::pin(async {})
        }));

        Ok(Self {
            peer_connection,
            channel,
            opened: Mutex::new(open_rx),
            received: Mutex::new(msg_rx),
        })
    }

    /// Create the offer and wait for all local candidates
    pub async fn offer(&self) -> HarnessResult<SessionDescription> {
        let offer = self.peer_connection.create_offer(None).await?;
        let mut gathering = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection.set_local_description(offer).await?;

        tokio::time::timeout(Duration::from_secs(10), gathering.recv())
            .await
            .map_err(|_| HarnessError::Timeout("client candidate gathering"))?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| HarnessError::Protocol("no local description".to_string()))?;
        Ok(SessionDescription::offer(local.sdp))
    }

    /// Apply the server's answer
    pub async fn accept_answer(&self, answer: SessionDescription) -> HarnessResult<()> {
        if answer.sdp_type != SdpType::Answer {
            return Err(HarnessError::Protocol(format!(
                "expected an answer, got {}",
                answer.sdp_type
            )));
        }
        let answer = RTCSessionDescription::answer(answer.sdp)?;
        self.peer_connection.set_remote_description(answer).await?;
        Ok(())
    }

    pub async fn wait_open(&self, timeout: Duration) -> HarnessResult<()> {
        let mut opened = self.opened.lock().await;
        tokio::time::timeout(timeout, opened.recv())
            .await
            .map_err(|_| HarnessError::Timeout("data channel open"))?
            .ok_or(HarnessError::Timeout("data channel open"))
    }

    pub async fn send_text(&self, text: &str) -> HarnessResult<()> {
        self.channel.send_text(text.to_string()).await?;
        Ok(())
    }

    pub async fn send_binary(&self, data: &[u8]) -> HarnessResult<()> {
        self.channel.send(&Bytes::copy_from_slice(data)).await?;
        Ok(())
    }

    pub async fn next_message(&self, timeout: Duration) -> HarnessResult<ReceivedMessage> {
        let mut received = self.received.lock().await;
        tokio::time::timeout(timeout, received.recv())
            .await
            .map_err(|_| HarnessError::Timeout("echoed message"))?
            .ok_or(HarnessError::Timeout("echoed message"))
    }

    pub async fn close(&self) -> HarnessResult<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

/// POST `offer` to the router and decode the answer
pub async fn post_offer(app: &Router, offer: &SessionDescription) -> HarnessResult<SessionDescription> {
    let body = serde_json::to_vec(offer).map_err(|e| HarnessError::Http(e.to_string()))?;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/offer")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .map_err(|e| HarnessError::Http(e.to_string()))?;

    let response = app
        .clone()
        .oneshot(request)
        .await
        .map_err(|e| HarnessError::Http(e.to_string()))?;
    if response.status() != StatusCode::OK {
        return Err(HarnessError::Http(format!("status {}", response.status())));
    }

    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| HarnessError::Http(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| HarnessError::Protocol(format!("bad answer: {}", e)))
}
