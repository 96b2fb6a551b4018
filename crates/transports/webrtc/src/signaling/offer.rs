//! Non-trickle offer/answer negotiation

use super::protocol::SessionDescription;
use crate::channels::EchoChannelHandler;
use crate::config::SignalingConfig;
use crate::peer::{
    GatheringComplete, LifecycleObserver, PeerSession, SessionEngine, SessionId, SessionRegistry,
};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Span};

/// Turns an inbound offer into a complete answer.
///
/// Every accepted offer creates one session. The session is registered before
/// negotiation starts and is removed and closed again if any later step fails.
pub struct SignalingHandler {
    engine: Arc<dyn SessionEngine>,
    registry: Arc<SessionRegistry>,
    config: SignalingConfig,
    observer: LifecycleObserver,
}

impl SignalingHandler {
    pub fn new(
        engine: Arc<dyn SessionEngine>,
        registry: Arc<SessionRegistry>,
        config: SignalingConfig,
    ) -> Self {
        let observer = LifecycleObserver::new(Arc::clone(&registry), config.diagnostics);
        Self {
            engine,
            registry,
            config,
            observer,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    /// Handle one offer request body.
    ///
    /// An empty body is a no-op and yields `Ok(None)`. Otherwise the answer is
    /// returned only once candidate gathering has finished, so it carries
    /// every local candidate.
    #[instrument(skip_all, fields(session_id = tracing::field::Empty))]
    pub async fn handle_offer(&self, body: &[u8]) -> Result<Option<SessionDescription>> {
        if body.is_empty() {
            debug!("Offer request without a body");
            return Ok(None);
        }

        let offer = SessionDescription::from_json(body).inspect_err(|e| {
            warn!("{}", e);
        })?;

        match self.negotiate(offer).await {
            Ok(answer) => Ok(Some(answer)),
            Err(e) => {
                if e.is_client_error() {
                    warn!("{}", e);
                } else {
                    error!("{}", e);
                }
                Err(e)
            }
        }
    }

    async fn negotiate(&self, offer: SessionDescription) -> Result<SessionDescription> {
        let engine_config = self.config.engine_config();
        let session = self.engine.create_session(&engine_config).await?;
        let session_id = session.id();
        Span::current().record("session_id", tracing::field::display(session_id));

        self.registry.add(Arc::clone(&session)).await;
        self.observer.attach(session.as_ref());
        EchoChannelHandler::attach(session.as_ref());

        let local = match self.exchange(session.as_ref(), offer).await {
            Ok(local) => local,
            Err(e) => {
                self.discard(session_id).await;
                return Err(e);
            }
        };

        info!(session_id = %session_id, "Answer ready");
        if self.config.diagnostics {
            self.log_session(session.as_ref());
            self.registry.log_sessions().await;
        }

        Ok(local)
    }

    async fn exchange(
        &self,
        session: &dyn PeerSession,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        session.set_remote_description(offer).await?;
        let answer = session.create_answer().await?;

        // The signal has to exist before gathering starts
        let mut gathering = session.gathering_complete().await;
        session.set_local_description(answer).await?;
        self.wait_for_gathering(&mut gathering).await?;

        session.local_description().await.ok_or_else(|| {
            Error::ResponseSerializationFailed(
                "no local description after gathering".to_string(),
            )
        })
    }

    /// Block until gathering completes or the configured bound passes
    async fn wait_for_gathering(&self, gathering: &mut GatheringComplete) -> Result<()> {
        let Some(limit) = self.config.gather_timeout.filter(|t| !t.is_zero()) else {
            gathering.recv().await;
            return Ok(());
        };

        tokio::time::timeout(limit, gathering.recv())
            .await
            .map(|_| ())
            .map_err(|_| Error::GatheringTimedOut(limit))
    }

    /// Remove and close a session whose negotiation failed
    async fn discard(&self, session_id: SessionId) {
        debug!(session_id = %session_id, "Discarding failed session");
        if let Err(e) = self.registry.remove_and_close_id(session_id).await {
            warn!(session_id = %session_id, "{}", e);
        }
    }

    fn log_session(&self, session: &dyn PeerSession) {
        debug!(
            session_id = %session.id(),
            state = %session.connection_state(),
            "Negotiated session"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::DataChannelPayload;
    use crate::config::PortRange;
    use crate::peer::IceConnectionState;
    use crate::signaling::protocol::SdpType;
    use crate::testing::{
        wait_until, FailurePoint, GatheringMode, ScriptedEngine, SCRIPTED_CANDIDATE,
    };
    use bytes::Bytes;
    use std::time::Duration;

    const OFFER: &[u8] = br#"{"type":"offer","sdp":"v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"}"#;

    fn handler(engine: &Arc<ScriptedEngine>, config: SignalingConfig) -> SignalingHandler {
        SignalingHandler::new(
            engine.clone(),
            Arc::new(SessionRegistry::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_empty_body_is_noop() {
        let engine = ScriptedEngine::new();
        let handler = handler(&engine, SignalingConfig::default());

        let result = handler.handle_offer(b"").await.unwrap();

        assert!(result.is_none());
        assert!(engine.sessions().is_empty());
        assert!(handler.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_offer_creates_nothing() {
        let engine = ScriptedEngine::new();
        let handler = handler(&engine, SignalingConfig::default());

        let err = handler.handle_offer(b"{not json").await.unwrap_err();

        assert!(matches!(err, Error::MalformedOffer(_)));
        assert!(engine.sessions().is_empty());
        assert!(engine.configs().is_empty());
    }

    #[tokio::test]
    async fn test_answer_carries_gathered_candidates() {
        let engine = ScriptedEngine::new();
        let handler = handler(&engine, SignalingConfig::default());

        let answer = handler.handle_offer(OFFER).await.unwrap().unwrap();

        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert!(answer.sdp.contains(SCRIPTED_CANDIDATE));
        assert!(answer.sdp.contains("a=end-of-candidates"));

        let sessions = engine.sessions();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].gathering_done());
        assert_eq!(
            sessions[0].remote_description().map(|d| d.sdp_type),
            Some(SdpType::Offer)
        );
        assert!(handler.registry().contains(sessions[0].id()).await);
    }

    #[tokio::test]
    async fn test_engine_config_follows_settings() {
        let engine = ScriptedEngine::new();
        let config = SignalingConfig {
            ice_server_url: Some("stun:stun.l.google.com:19302".to_string()),
            min_port: 50000,
            max_port: 50100,
            external_ip: Some("203.0.113.7".to_string()),
            ..Default::default()
        };
        let handler = handler(&engine, config);

        handler.handle_offer(OFFER).await.unwrap();

        let configs = engine.configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].ice_servers, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(
            configs[0].port_range,
            Some(PortRange {
                min: 50000,
                max: 50100
            })
        );
        assert_eq!(configs[0].nat_1to1_ips, vec!["203.0.113.7"]);
    }

    #[tokio::test]
    async fn test_inverted_port_range_still_negotiates() {
        let engine = ScriptedEngine::new();
        let config = SignalingConfig {
            min_port: 6000,
            max_port: 5000,
            ..Default::default()
        };
        let handler = handler(&engine, config);

        assert!(handler.handle_offer(OFFER).await.unwrap().is_some());
        assert_eq!(engine.configs()[0].port_range, None);
    }

    #[tokio::test]
    async fn test_session_creation_failure() {
        let engine = ScriptedEngine::new();
        engine.fail_create();
        let handler = handler(&engine, SignalingConfig::default());

        let err = handler.handle_offer(OFFER).await.unwrap_err();

        assert!(matches!(err, Error::SessionCreationFailed(_)));
        assert!(handler.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_step_failures_tear_session_down() {
        let cases = [
            FailurePoint::RemoteDescription,
            FailurePoint::Answer,
            FailurePoint::LocalDescription,
        ];

        for point in cases {
            let engine = ScriptedEngine::new();
            engine.fail_at(point);
            let handler = handler(&engine, SignalingConfig::default());

            let err = handler.handle_offer(OFFER).await.unwrap_err();
            match point {
                FailurePoint::RemoteDescription => {
                    assert!(matches!(err, Error::RemoteDescriptionRejected(_)))
                }
                FailurePoint::Answer => assert!(matches!(err, Error::AnswerGenerationFailed(_))),
                FailurePoint::LocalDescription => {
                    assert!(matches!(err, Error::LocalDescriptionRejected(_)))
                }
            }

            let session = &engine.sessions()[0];
            assert!(!handler.registry().contains(session.id()).await);
            assert!(handler.registry().is_empty().await);
            assert_eq!(session.close_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_non_offer_type_is_rejected() {
        let engine = ScriptedEngine::new();
        let handler = handler(&engine, SignalingConfig::default());

        let err = handler
            .handle_offer(br#"{"type":"rollback","sdp":""}"#)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RemoteDescriptionRejected(_)));
    }

    #[tokio::test]
    async fn test_gather_timeout_tears_session_down() {
        let engine = ScriptedEngine::new();
        engine.set_gathering(GatheringMode::Manual);
        let config = SignalingConfig {
            gather_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let handler = handler(&engine, config);

        let err = handler.handle_offer(OFFER).await.unwrap_err();

        assert!(matches!(err, Error::GatheringTimedOut(_)));
        assert!(handler.registry().is_empty().await);
        assert_eq!(engine.sessions()[0].close_count(), 1);
    }

    #[tokio::test]
    async fn test_unbounded_wait_returns_after_gathering() {
        let engine = ScriptedEngine::new();
        engine.set_gathering(GatheringMode::Manual);
        let config = SignalingConfig {
            gather_timeout: None,
            ..Default::default()
        };
        let handler = Arc::new(handler(&engine, config));

        let task = {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.handle_offer(OFFER).await })
        };

        let sessions = {
            let engine = Arc::clone(&engine);
            move || {
                let engine = Arc::clone(&engine);
                async move { !engine.sessions().is_empty() }
            }
        };
        assert!(wait_until(sessions).await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        engine.sessions()[0].complete_gathering();
        let answer = task.await.unwrap().unwrap().unwrap();
        assert!(answer.sdp.contains(SCRIPTED_CANDIDATE));
    }

    #[tokio::test]
    async fn test_negotiated_session_echoes_and_fails_cleanly() {
        let engine = ScriptedEngine::new();
        let handler = handler(&engine, SignalingConfig::default());
        handler.handle_offer(OFFER).await.unwrap();
        let session = engine.sessions()[0].clone();

        let channel = session.open_data_channel("echo", 0);
        channel
            .deliver(DataChannelPayload::Text(Bytes::from_static(b"ping")))
            .await;
        assert_eq!(
            channel.sent(),
            vec![DataChannelPayload::Text(Bytes::from_static(b"ping"))]
        );

        session.fire_ice_state(IceConnectionState::Failed);
        let registry = Arc::clone(handler.registry());
        assert!(
            wait_until(move || {
                let registry = Arc::clone(&registry);
                async move { registry.is_empty().await }
            })
            .await
        );
        assert_eq!(session.close_count(), 1);
    }
}
