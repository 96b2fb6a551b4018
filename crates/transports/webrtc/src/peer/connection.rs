//! webrtc-rs session engine

use super::{
    DataChannelCallback, GatheringComplete, IceConnectionState, PeerConnectionState, PeerSession,
    SessionEngine, SessionId, SignalingState, StateCallback,
};
use crate::channels::{DataChannel, RtcDataChannel};
use crate::config::EngineConfig;
use crate::signaling::protocol::{SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

/// Builds a fresh webrtc-rs API and peer connection per session
#[derive(Debug, Default, Clone)]
pub struct RtcSessionEngine;

impl RtcSessionEngine {
    pub fn new() -> Self {
        Self
    }

    fn setting_engine(config: &EngineConfig) -> SettingEngine {
        let mut settings = SettingEngine::default();

        if let Some(range) = config.port_range {
            match EphemeralUDP::new(range.min, range.max) {
                Ok(udp) => settings.set_udp_network(UDPNetwork::Ephemeral(udp)),
                // Non-fatal: negotiate on any port
                Err(e) => warn!(
                    min_port = range.min,
                    max_port = range.max,
                    "{}",
                    Error::Configuration(format!("cannot set UDP port range: {}", e))
                ),
            }
        }

        if !config.nat_1to1_ips.is_empty() {
            settings.set_nat_1to1_ips(config.nat_1to1_ips.clone(), RTCIceCandidateType::Host);
        }

        if config.include_loopback_candidates {
            settings.set_include_loopback_candidate(true);
        }

        settings
    }
}

#[async_trait]
impl SessionEngine for RtcSessionEngine {
    #[instrument(skip_all)]
    async fn create_session(&self, config: &EngineConfig) -> Result<Arc<dyn PeerSession>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            Error::SessionCreationFailed(format!("Failed to register codecs: {}", e))
        })?;

        let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                Error::SessionCreationFailed(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .with_setting_engine(Self::setting_engine(config))
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::SessionCreationFailed(format!("Failed to create peer connection: {}", e))
        })?;

        let session = RtcPeerSession::new(Arc::new(peer_connection));
        info!(session_id = %session.id(), "New peer connection created");

        Ok(Arc::new(session))
    }
}

/// A session backed by an [`RTCPeerConnection`]
pub struct RtcPeerSession {
    id: SessionId,
    peer_connection: Arc<RTCPeerConnection>,
    data_channels: Arc<Mutex<Vec<Arc<dyn DataChannel>>>>,
}

impl RtcPeerSession {
    pub fn new(peer_connection: Arc<RTCPeerConnection>) -> Self {
        Self {
            id: SessionId::new(),
            peer_connection,
            data_channels: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Underlying webrtc-rs connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

fn to_rtc_description(desc: SessionDescription) -> std::result::Result<RTCSessionDescription, String> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => return Err("rollback descriptions are not supported".to_string()),
    };
    parsed.map_err(|e| e.to_string())
}

fn from_rtc_description(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::Unspecified => return None,
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
    })
}

fn connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    Some(match state {
        RTCPeerConnectionState::Unspecified => return None,
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
    })
}

fn signaling_state(state: RTCSignalingState) -> Option<SignalingState> {
    Some(match state {
        RTCSignalingState::Unspecified => return None,
        RTCSignalingState::Stable => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
    })
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc).map_err(Error::RemoteDescriptionRejected)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::RemoteDescriptionRejected(e.to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::AnswerGenerationFailed(e.to_string()))?;

        from_rtc_description(answer).ok_or_else(|| {
            Error::AnswerGenerationFailed("engine produced an untyped description".to_string())
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc).map_err(Error::LocalDescriptionRejected)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| Error::LocalDescriptionRejected(e.to_string()))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn gathering_complete(&self) -> GatheringComplete {
        self.peer_connection.gathering_complete_promise().await
    }

    fn on_ice_connection_state_change(&self, callback: StateCallback<IceConnectionState>) {
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                if let Some(state) = ice_state(state) {
                    callback(state);
                }
                Box::pin(async {})
            }));
    }

    fn on_ice_candidate(&self, callback: StateCallback<Option<String>>) {
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                callback(candidate.map(|c| c.to_string()));
                Box::pin(async {})
            }));
    }

    fn on_connection_state_change(&self, callback: StateCallback<PeerConnectionState>) {
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                if let Some(state) = connection_state(state) {
                    callback(state);
                }
                Box::pin(async {})
            }));
    }

    fn on_signaling_state_change(&self, callback: StateCallback<SignalingState>) {
        self.peer_connection
            .on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
                if let Some(state) = signaling_state(state) {
                    callback(state);
                }
                Box::pin(async {})
            }));
    }

    fn on_data_channel(&self, callback: DataChannelCallback) {
        let data_channels = Arc::clone(&self.data_channels);
        self.peer_connection
            .on_data_channel(Box::new(move |rtc_channel: Arc<RTCDataChannel>| {
                let channel: Arc<dyn DataChannel> =
                    Arc::new(RtcDataChannel::from_rtc_channel(rtc_channel));
                // The session owns its channels; handlers only hold weak references
                data_channels.lock().push(Arc::clone(&channel));
                callback(channel);
                Box::pin(async {})
            }));
    }

    fn connection_state(&self) -> PeerConnectionState {
        connection_state(self.peer_connection.connection_state()).unwrap_or(PeerConnectionState::New)
    }

    fn data_channels(&self) -> Vec<Arc<dyn DataChannel>> {
        self.data_channels.lock().clone()
    }

    async fn close(&self) -> Result<()> {
        info!(session_id = %self.id, "Closing peer connection");
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::CloseFailed(e.to_string()))
    }
}
