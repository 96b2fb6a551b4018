//! WebRTC echo signaling
//!
//! Non-trickle offer/answer signaling for real-time peer connections. A client
//! posts an SDP offer; the server creates a session, waits for candidate
//! gathering to finish and returns the complete answer. Every data channel the
//! remote peer opens echoes its messages back unchanged.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          webrtc-echo                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────────┐                                           │
//! │  │  OfferServer     │ ← POST /offer                             │
//! │  │  (axum)          │   trace → cors → rate limit               │
//! │  └────────┬─────────┘                                           │
//! │           │ body                                                │
//! │           ▼                                                     │
//! │  ┌──────────────────┐   ┌──────────────────┐                    │
//! │  │ SignalingHandler │──▶│  SessionEngine   │ (webrtc-rs)        │
//! │  └────────┬─────────┘   └──────────────────┘                    │
//! │           │ registers, attaches                                 │
//! │           ▼                                                     │
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌─────────────┐  │
//! │  │ SessionRegistry  │◀──│ LifecycleObserver│   │ EchoChannel │  │
//! │  │                  │   │ (ICE failed)     │   │ Handler     │  │
//! │  └──────────────────┘   └──────────────────┘   └─────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use webrtc_echo::{OfferServer, RtcSessionEngine, ServerConfig};
//!
//! # async fn run() -> webrtc_echo::Result<()> {
//! let config = ServerConfig {
//!     port: 8080,
//!     ..Default::default()
//! };
//! let server = OfferServer::new(config, Arc::new(RtcSessionEngine::new()));
//! server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

pub mod channels;
pub mod config;
pub mod error;
pub mod peer;
pub mod server;
pub mod signaling;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use channels::{DataChannel, DataChannelPayload, EchoChannelHandler};
pub use config::{FailureResponse, ServerConfig, SignalingConfig, TlsConfig};
pub use error::{Error, Result};
pub use peer::{
    LifecycleObserver, PeerSession, RtcSessionEngine, SessionEngine, SessionId, SessionRegistry,
};
pub use server::OfferServer;
pub use signaling::{SdpType, SessionDescription, SignalingHandler};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
