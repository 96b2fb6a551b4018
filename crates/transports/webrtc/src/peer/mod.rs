//! Peer sessions: the engine capability interface, the session registry and
//! the lifecycle observer.
//!
//! The core never talks to webrtc-rs directly. It drives any
//! [`SessionEngine`]; [`connection::RtcSessionEngine`] is the production one.

pub mod connection;
pub mod lifecycle;
pub mod registry;
pub mod state;

use crate::channels::DataChannel;
use crate::config::EngineConfig;
use crate::signaling::protocol::SessionDescription;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use connection::{RtcPeerSession, RtcSessionEngine};
pub use lifecycle::{LifecycleObserver, SessionEvent};
pub use registry::SessionRegistry;
pub use state::{IceConnectionState, PeerConnectionState, SessionId, SignalingState};

/// Engine notification callback
///
/// Engines may invoke callbacks from their own dispatch tasks; callbacks must
/// not block.
pub type StateCallback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Callback invoked for every data channel the remote peer opens
pub type DataChannelCallback = StateCallback<Arc<dyn DataChannel>>;

/// One-shot "candidate gathering complete" signal.
///
/// Completion is signalled by a message or by the sender being dropped, so
/// waiters treat any `recv()` return as done.
pub type GatheringComplete = mpsc::Receiver<()>;

/// Creates negotiable sessions
#[async_trait]
pub trait SessionEngine: Send + Sync {
    async fn create_session(&self, config: &EngineConfig) -> Result<Arc<dyn PeerSession>>;
}

/// One negotiated real-time peer connection
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Identity, fixed at construction
    fn id(&self) -> SessionId;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    async fn local_description(&self) -> Option<SessionDescription>;

    /// Obtain the gathering signal. Must be called before the local
    /// description is set.
    async fn gathering_complete(&self) -> GatheringComplete;

    fn on_ice_connection_state_change(&self, callback: StateCallback<IceConnectionState>);

    /// Candidate discovered; `None` marks the end of gathering
    fn on_ice_candidate(&self, callback: StateCallback<Option<String>>);

    fn on_connection_state_change(&self, callback: StateCallback<PeerConnectionState>);

    fn on_signaling_state_change(&self, callback: StateCallback<SignalingState>);

    fn on_data_channel(&self, callback: DataChannelCallback);

    fn connection_state(&self) -> PeerConnectionState;

    /// Data channels opened by the remote peer so far
    fn data_channels(&self) -> Vec<Arc<dyn DataChannel>>;

    async fn close(&self) -> Result<()>;
}
