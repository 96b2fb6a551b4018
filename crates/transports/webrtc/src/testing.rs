//! Scripted in-memory session engine for tests
//!
//! Sessions negotiate instantly and let the test fire engine notifications,
//! open data channels, and inject failures at any protocol step.

use crate::channels::{DataChannel, DataChannelPayload, MessageHandler, OpenHandler};
use crate::config::EngineConfig;
use crate::peer::{
    DataChannelCallback, GatheringComplete, IceConnectionState, PeerConnectionState, PeerSession,
    SessionEngine, SessionId, SignalingState, StateCallback,
};
use crate::signaling::protocol::{SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Host candidate appended to every scripted answer once gathering completes
pub const SCRIPTED_CANDIDATE: &str = "candidate:1 1 udp 2130706431 192.0.2.10 50000 typ host";

/// Protocol step at which a scripted session fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    RemoteDescription,
    Answer,
    LocalDescription,
}

/// When scripted candidate gathering completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatheringMode {
    /// As soon as the local description is set
    #[default]
    Immediate,
    /// Only when the test calls [`ScriptedSession::complete_gathering`]
    Manual,
}

/// Poll `condition` until it holds, for up to one second
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Engine handing out [`ScriptedSession`]s
#[derive(Default)]
pub struct ScriptedEngine {
    fail_create: AtomicBool,
    failure: Mutex<Option<FailurePoint>>,
    gathering: Mutex<GatheringMode>,
    configs: Mutex<Vec<EngineConfig>>,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `create_session` fail
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Make every new session fail at `point`
    pub fn fail_at(&self, point: FailurePoint) {
        *self.failure.lock() = Some(point);
    }

    pub fn set_gathering(&self, mode: GatheringMode) {
        *self.gathering.lock() = mode;
    }

    /// Sessions created so far
    pub fn sessions(&self) -> Vec<Arc<ScriptedSession>> {
        self.sessions.lock().clone()
    }

    /// Configurations passed to `create_session`
    pub fn configs(&self) -> Vec<EngineConfig> {
        self.configs.lock().clone()
    }
}

#[async_trait]
impl SessionEngine for ScriptedEngine {
    async fn create_session(&self, config: &EngineConfig) -> Result<Arc<dyn PeerSession>> {
        self.configs.lock().push(config.clone());

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::SessionCreationFailed("scripted failure".to_string()));
        }

        let session = ScriptedSession::new();
        *session.failure.lock() = *self.failure.lock();
        *session.gathering.lock() = *self.gathering.lock();
        self.sessions.lock().push(Arc::clone(&session));

        Ok(session)
    }
}

/// In-memory session
pub struct ScriptedSession {
    id: SessionId,
    failure: Mutex<Option<FailurePoint>>,
    gathering: Mutex<GatheringMode>,
    gathering_tx: Mutex<Option<mpsc::Sender<()>>>,
    gathering_done: AtomicBool,
    remote: Mutex<Option<SessionDescription>>,
    pending_local: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    state: Mutex<PeerConnectionState>,
    close_count: AtomicUsize,
    fail_close: AtomicBool,
    ice_cb: Mutex<Option<StateCallback<IceConnectionState>>>,
    candidate_cb: Mutex<Option<StateCallback<Option<String>>>>,
    connection_cb: Mutex<Option<StateCallback<PeerConnectionState>>>,
    signaling_cb: Mutex<Option<StateCallback<SignalingState>>>,
    data_channel_cb: Mutex<Option<DataChannelCallback>>,
    data_channels: Mutex<Vec<Arc<dyn DataChannel>>>,
}

impl ScriptedSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::new(),
            failure: Mutex::new(None),
            gathering: Mutex::new(GatheringMode::Immediate),
            gathering_tx: Mutex::new(None),
            gathering_done: AtomicBool::new(false),
            remote: Mutex::new(None),
            pending_local: Mutex::new(None),
            local: Mutex::new(None),
            state: Mutex::new(PeerConnectionState::New),
            close_count: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
            ice_cb: Mutex::new(None),
            candidate_cb: Mutex::new(None),
            connection_cb: Mutex::new(None),
            signaling_cb: Mutex::new(None),
            data_channel_cb: Mutex::new(None),
            data_channels: Mutex::new(Vec::new()),
        })
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Make `close` report an error (the close still counts)
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn gathering_done(&self) -> bool {
        self.gathering_done.load(Ordering::SeqCst)
    }

    /// Finish candidate gathering: publish the final local description,
    /// announce the end of candidates and release the one-shot signal.
    pub fn complete_gathering(&self) {
        if self.gathering_done.swap(true, Ordering::SeqCst) {
            return;
        }

        self.publish_local();
        self.fire_candidate(Some(SCRIPTED_CANDIDATE.to_string()));
        self.fire_candidate(None);
        self.gathering_tx.lock().take();
    }

    pub fn fire_ice_state(&self, state: IceConnectionState) {
        if let Some(cb) = self.ice_cb.lock().as_ref() {
            cb(state);
        }
    }

    pub fn fire_candidate(&self, candidate: Option<String>) {
        if let Some(cb) = self.candidate_cb.lock().as_ref() {
            cb(candidate);
        }
    }

    pub fn fire_connection_state(&self, state: PeerConnectionState) {
        *self.state.lock() = state;
        if let Some(cb) = self.connection_cb.lock().as_ref() {
            cb(state);
        }
    }

    pub fn fire_signaling_state(&self, state: SignalingState) {
        if let Some(cb) = self.signaling_cb.lock().as_ref() {
            cb(state);
        }
    }

    /// Simulate the remote peer opening a data channel
    pub fn open_data_channel(&self, label: &str, id: u16) -> Arc<ScriptedChannel> {
        let channel = ScriptedChannel::new(label, id);
        let handle: Arc<dyn DataChannel> = channel.clone();
        self.data_channels.lock().push(Arc::clone(&handle));

        if let Some(cb) = self.data_channel_cb.lock().as_ref() {
            cb(handle);
        }
        channel.open();
        channel
    }

    /// Drop every registered callback, as an engine does once a session is gone
    pub fn clear_callbacks(&self) {
        self.ice_cb.lock().take();
        self.candidate_cb.lock().take();
        self.connection_cb.lock().take();
        self.signaling_cb.lock().take();
        self.data_channel_cb.lock().take();
    }

    fn publish_local(&self) {
        if let Some(mut desc) = self.pending_local.lock().take() {
            desc.sdp.push_str(&format!("a={}\r\na=end-of-candidates\r\n", SCRIPTED_CANDIDATE));
            *self.local.lock() = Some(desc);
        }
    }

    fn fails_at(&self, point: FailurePoint) -> bool {
        *self.failure.lock() == Some(point)
    }
}

#[async_trait]
impl PeerSession for ScriptedSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.fails_at(FailurePoint::RemoteDescription) {
            return Err(Error::RemoteDescriptionRejected("scripted failure".to_string()));
        }
        if desc.sdp_type != SdpType::Offer {
            return Err(Error::RemoteDescriptionRejected(format!(
                "expected an offer, got {}",
                desc.sdp_type
            )));
        }

        *self.remote.lock() = Some(desc);
        self.fire_signaling_state(SignalingState::HaveRemoteOffer);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.fails_at(FailurePoint::Answer) {
            return Err(Error::AnswerGenerationFailed("scripted failure".to_string()));
        }
        if self.remote.lock().is_none() {
            return Err(Error::AnswerGenerationFailed(
                "no remote description".to_string(),
            ));
        }

        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.id.as_uuid().as_u128() as u64
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        if self.fails_at(FailurePoint::LocalDescription) {
            return Err(Error::LocalDescriptionRejected("scripted failure".to_string()));
        }

        *self.pending_local.lock() = Some(desc);
        self.fire_signaling_state(SignalingState::Stable);

        if self.gathering_done() {
            self.publish_local();
        } else if *self.gathering.lock() == GatheringMode::Immediate {
            self.complete_gathering();
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn gathering_complete(&self) -> GatheringComplete {
        let (tx, rx) = mpsc::channel(1);
        if !self.gathering_done() {
            *self.gathering_tx.lock() = Some(tx);
        }
        rx
    }

    fn on_ice_connection_state_change(&self, callback: StateCallback<IceConnectionState>) {
        *self.ice_cb.lock() = Some(callback);
    }

    fn on_ice_candidate(&self, callback: StateCallback<Option<String>>) {
        *self.candidate_cb.lock() = Some(callback);
    }

    fn on_connection_state_change(&self, callback: StateCallback<PeerConnectionState>) {
        *self.connection_cb.lock() = Some(callback);
    }

    fn on_signaling_state_change(&self, callback: StateCallback<SignalingState>) {
        *self.signaling_cb.lock() = Some(callback);
    }

    fn on_data_channel(&self, callback: DataChannelCallback) {
        *self.data_channel_cb.lock() = Some(callback);
    }

    fn connection_state(&self) -> PeerConnectionState {
        *self.state.lock()
    }

    fn data_channels(&self) -> Vec<Arc<dyn DataChannel>> {
        self.data_channels.lock().clone()
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.gathering_tx.lock().take();
        self.fire_connection_state(PeerConnectionState::Closed);

        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::CloseFailed("scripted failure".to_string()));
        }
        Ok(())
    }
}

/// In-memory data channel recording everything sent on it
pub struct ScriptedChannel {
    label: String,
    id: u16,
    open_handler: Mutex<Option<OpenHandler>>,
    message_handler: Mutex<Option<MessageHandler>>,
    sent: Mutex<Vec<DataChannelPayload>>,
    fail_next_send: AtomicBool,
}

impl ScriptedChannel {
    pub fn new(label: &str, id: u16) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            id,
            open_handler: Mutex::new(None),
            message_handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            fail_next_send: AtomicBool::new(false),
        })
    }

    /// Fire the open callback; false if there was none left to fire
    pub fn open(&self) -> bool {
        let handler = self.open_handler.lock().take();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }

    /// Deliver an inbound message and wait for its handler to finish
    pub async fn deliver(&self, payload: DataChannelPayload) {
        let pending = {
            let mut handler = self.message_handler.lock();
            handler.as_mut().map(|handler| handler(payload))
        };
        if let Some(pending) = pending {
            pending.await;
        }
    }

    pub fn sent(&self) -> Vec<DataChannelPayload> {
        self.sent.lock().clone()
    }

    pub fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataChannel for ScriptedChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn id(&self) -> u16 {
        self.id
    }

    fn on_open(&self, handler: OpenHandler) {
        *self.open_handler.lock() = Some(handler);
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.message_handler.lock() = Some(handler);
    }

    async fn send(&self, payload: DataChannelPayload) -> Result<usize> {
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(Error::EchoSendFailed("scripted failure".to_string()));
        }
        let len = payload.len();
        self.sent.lock().push(payload);
        Ok(len)
    }
}
