//! HTTP front door
//!
//! Serves `/offer` over HTTP or HTTPS:
//! - `POST /offer` - Negotiate a session, respond with the complete answer
//! - any other method - No-op, `200` with an empty body

pub mod rate_limit;

use crate::config::{FailureResponse, ServerConfig};
use crate::peer::{SessionEngine, SessionRegistry};
use crate::signaling::SignalingHandler;
use crate::{Error, Result};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub use rate_limit::{ClientRateLimiter, TokenBucket};

/// Grace period for in-flight requests after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// State shared across handlers
#[derive(Clone)]
struct AppState {
    signaling: Arc<SignalingHandler>,
    failure_response: FailureResponse,
}

/// Error body returned under [`FailureResponse::Status`]
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error kind, e.g. `malformed_offer`
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
}

/// HTTP server accepting offers
pub struct OfferServer {
    config: ServerConfig,
    signaling: Arc<SignalingHandler>,
}

impl OfferServer {
    /// Create a server with its own session registry
    pub fn new(config: ServerConfig, engine: Arc<dyn SessionEngine>) -> Self {
        Self::with_registry(config, engine, Arc::new(SessionRegistry::new()))
    }

    pub fn with_registry(
        config: ServerConfig,
        engine: Arc<dyn SessionEngine>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let signaling = Arc::new(SignalingHandler::new(
            engine,
            registry,
            config.signaling.clone(),
        ));
        Self { config, signaling }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.signaling.registry()
    }

    /// Build the router.
    ///
    /// Layers, outermost first: request tracing, CORS, then the per-client
    /// rate limiter (only when a positive rate is configured).
    pub fn router(&self) -> Result<Router> {
        let state = AppState {
            signaling: Arc::clone(&self.signaling),
            failure_response: self.config.failure_response,
        };

        let mut router = Router::new().route("/offer", any(offer_handler));

        if let Some(rate) = self.config.rate_limit() {
            let limiter = Arc::new(ClientRateLimiter::new(rate));
            router = router.route_layer(middleware::from_fn_with_state(
                limiter,
                rate_limit::limit_requests,
            ));
        }

        Ok(router
            .with_state(state)
            .layer(
                tower::ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(self.cors_layer()?),
            ))
    }

    fn cors_layer(&self) -> Result<CorsLayer> {
        if self.config.allowed_origins.is_empty() {
            return Ok(CorsLayer::permissive());
        }

        let origins = self
            .config
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim()).map_err(|e| {
                    Error::InvalidConfig(format!("invalid allowed origin {}: {}", origin, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::POST])
            .allow_headers([header::CONTENT_TYPE]))
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Uses HTTPS when a certificate/key pair is configured. After the
    /// listener drains, every registered session is closed.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.validate()?;
        let addr = self.config.socket_addr()?;
        let app = self
            .router()?
            .into_make_service_with_connect_info::<SocketAddr>();

        let handle = axum_server::Handle::new();
        tokio::spawn({
            let handle = handle.clone();
            async move {
                shutdown.await;
                info!("Shutdown requested, draining connections");
                handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            }
        });

        let served = match &self.config.tls {
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                    .await
                    .map_err(|e| {
                        Error::Server(format!(
                            "failed to load certificate {} / key {}: {}",
                            tls.cert_file.display(),
                            tls.key_file.display(),
                            e
                        ))
                    })?;

                info!("Listening on https://{}", addr);
                axum_server::bind_rustls(addr, rustls)
                    .handle(handle)
                    .serve(app)
                    .await
            }
            None => {
                info!("Listening on http://{}", addr);
                axum_server::bind(addr).handle(handle).serve(app).await
            }
        };

        self.registry().close_all().await;
        served.map_err(|e| Error::Server(format!("server error: {}", e)))
    }
}

async fn offer_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    body: Bytes,
) -> Response {
    if let Some(ConnectInfo(remote_addr)) = connect_info {
        debug!(%remote_addr, %method, "Incoming offer");
    }

    if method != Method::POST {
        debug!(%method, "Ignoring non-POST offer request");
        return StatusCode::OK.into_response();
    }

    let answer = state
        .signaling
        .handle_offer(&body)
        .await
        .and_then(|answer| answer.map(|a| a.to_json()).transpose());

    match answer {
        Ok(Some(json)) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Ok(None) => StatusCode::OK.into_response(),
        Err(e) => failure_response(state.failure_response, &e),
    }
}

/// Map a failed offer to a response under the configured policy
fn failure_response(policy: FailureResponse, e: &Error) -> Response {
    match policy {
        FailureResponse::Silent => StatusCode::OK.into_response(),
        FailureResponse::Status => {
            let status = match e {
                Error::MalformedOffer(_) => StatusCode::BAD_REQUEST,
                Error::GatheringTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(ErrorResponse {
                    error_type: e.kind().to_string(),
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
