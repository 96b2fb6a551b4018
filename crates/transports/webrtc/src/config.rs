//! Configuration types for the signaling handler and HTTP front door

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default bound on the candidate gathering wait
pub const DEFAULT_GATHER_TIMEOUT: Duration = Duration::from_secs(30);

const ICE_URL_SCHEMES: [&str; 4] = ["stun:", "stuns:", "turn:", "turns:"];

/// Settings the signaling handler turns into an [`EngineConfig`] per offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// ICE (STUN) server URL, e.g. `stun:stun.l.google.com:19302`
    pub ice_server_url: Option<String>,

    /// Lower bound of the ephemeral UDP port range (0 = unset)
    pub min_port: u16,

    /// Upper bound of the ephemeral UDP port range (0 = unset)
    pub max_port: u16,

    /// Externally visible address advertised as the host candidate
    pub external_ip: Option<String>,

    /// Upper bound on the gathering wait; `None` waits forever
    pub gather_timeout: Option<Duration>,

    /// Emit registry listings on lifecycle milestones
    pub diagnostics: bool,

    /// Gather loopback candidates (local testing only)
    pub include_loopback_candidates: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ice_server_url: None,
            min_port: 0,
            max_port: 0,
            external_ip: None,
            gather_timeout: Some(DEFAULT_GATHER_TIMEOUT),
            diagnostics: false,
            include_loopback_candidates: false,
        }
    }
}

impl SignalingConfig {
    /// Build the engine configuration for a new session.
    ///
    /// An unusable port range is a non-fatal [`Error::Configuration`]: it is
    /// logged and the session is created without the restriction.
    pub fn engine_config(&self) -> EngineConfig {
        let port_range = match PortRange::from_bounds(self.min_port, self.max_port) {
            Ok(range) => range,
            Err(e) => {
                warn!(
                    min_port = self.min_port,
                    max_port = self.max_port,
                    "{}; continuing without port restriction",
                    e
                );
                None
            }
        };

        EngineConfig {
            ice_servers: self.ice_server_url.iter().cloned().collect(),
            port_range,
            nat_1to1_ips: self.external_ip.iter().cloned().collect(),
            include_loopback_candidates: self.include_loopback_candidates,
        }
    }
}

/// Per-session engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// ICE server URLs
    pub ice_servers: Vec<String>,

    /// Restricted ephemeral UDP port range for transport sockets
    pub port_range: Option<PortRange>,

    /// Fixed externally visible host addresses
    pub nat_1to1_ips: Vec<String>,

    /// Gather loopback candidates
    pub include_loopback_candidates: bool,
}

/// Inclusive UDP port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    /// Interpret a pair of configured bounds.
    ///
    /// Returns `Ok(None)` unless both bounds are positive, and a
    /// configuration error when they are inverted.
    pub fn from_bounds(min: u16, max: u16) -> Result<Option<Self>> {
        if min == 0 || max == 0 {
            return Ok(None);
        }
        if min > max {
            return Err(Error::Configuration(format!(
                "cannot set UDP port range; min:{}, max:{}",
                min, max
            )));
        }
        Ok(Some(Self { min, max }))
    }
}

/// How the front door reports a failed offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailureResponse {
    /// `200` with an empty body, whatever went wrong
    #[default]
    Silent,
    /// `4xx`/`5xx` with a JSON error body
    Status,
}

/// TLS certificate/key pair (PEM files)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// HTTP front door configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (IP or host name)
    pub addr: String,

    /// Listen port
    pub port: u16,

    /// Serve HTTPS when set
    pub tls: Option<TlsConfig>,

    /// Allowed CORS origins; empty allows everything
    pub allowed_origins: Vec<String>,

    /// Maximum requests per second on `/offer`; `None` is unlimited
    pub max_request_rate: Option<f64>,

    /// Failure reporting policy
    pub failure_response: FailureResponse,

    /// Signaling settings
    pub signaling: SignalingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 443,
            tls: None,
            allowed_origins: Vec::new(),
            max_request_rate: None,
            failure_response: FailureResponse::Silent,
            signaling: SignalingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build the TLS pair from optional paths.
    ///
    /// Both or neither must be present.
    pub fn tls_from_paths(
        cert_file: Option<PathBuf>,
        key_file: Option<PathBuf>,
    ) -> Result<Option<TlsConfig>> {
        match (cert_file, key_file) {
            (Some(cert_file), Some(key_file)) => Ok(Some(TlsConfig {
                cert_file,
                key_file,
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::InvalidConfig(
                "cert file given without a key file".to_string(),
            )),
            (None, Some(_)) => Err(Error::InvalidConfig(
                "key file given without a cert file".to_string(),
            )),
        }
    }

    /// Resolve the listen address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        (self.addr.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::InvalidConfig(format!("invalid listen address {}: {}", self.addr, e))
            })?
            .next()
            .ok_or_else(|| {
                Error::InvalidConfig(format!("listen address {} did not resolve", self.addr))
            })
    }

    /// Effective rate limit, if any
    pub fn rate_limit(&self) -> Option<f64> {
        self.max_request_rate.filter(|rate| *rate > 0.0)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the listen address does not resolve
    /// - `max_request_rate` is negative or not finite
    /// - `ice_server_url` is not a `stun:`/`stuns:`/`turn:`/`turns:` URL
    /// - an allowed origin is blank
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if let Some(rate) = self.max_request_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "max_request_rate must be a non-negative number, got {}",
                    rate
                )));
            }
        }

        if let Some(url) = &self.signaling.ice_server_url {
            if !ICE_URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(Error::InvalidConfig(format!(
                    "ice server url must start with stun:, stuns:, turn: or turns:, got {}",
                    url
                )));
            }
        }

        if self.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "allowed origins must not contain blank entries".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr, "127.0.0.1");
        assert_eq!(config.port, 443);
        assert_eq!(config.failure_response, FailureResponse::Silent);
        assert_eq!(config.signaling.gather_timeout, Some(DEFAULT_GATHER_TIMEOUT));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_range_requires_both_bounds() {
        assert_eq!(PortRange::from_bounds(0, 0).unwrap(), None);
        assert_eq!(PortRange::from_bounds(10000, 0).unwrap(), None);
        assert_eq!(PortRange::from_bounds(0, 20000).unwrap(), None);
        assert_eq!(
            PortRange::from_bounds(10000, 20000).unwrap(),
            Some(PortRange {
                min: 10000,
                max: 20000
            })
        );
    }

    #[test]
    fn test_inverted_port_range_is_non_fatal() {
        let err = PortRange::from_bounds(20000, 10000).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(!err.is_fatal());

        let signaling = SignalingConfig {
            min_port: 20000,
            max_port: 10000,
            ..Default::default()
        };
        assert_eq!(signaling.engine_config().port_range, None);
    }

    #[test]
    fn test_engine_config_from_signaling() {
        let signaling = SignalingConfig {
            ice_server_url: Some("stun:stun.l.google.com:19302".to_string()),
            min_port: 50000,
            max_port: 50100,
            external_ip: Some("203.0.113.7".to_string()),
            ..Default::default()
        };

        let engine = signaling.engine_config();
        assert_eq!(engine.ice_servers, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(
            engine.port_range,
            Some(PortRange {
                min: 50000,
                max: 50100
            })
        );
        assert_eq!(engine.nat_1to1_ips, vec!["203.0.113.7"]);
        assert!(!engine.include_loopback_candidates);
    }

    #[test]
    fn test_engine_config_empty_by_default() {
        let engine = SignalingConfig::default().engine_config();
        assert_eq!(engine, EngineConfig::default());
    }

    #[test]
    fn test_tls_from_paths() {
        assert_eq!(ServerConfig::tls_from_paths(None, None).unwrap(), None);
        assert!(ServerConfig::tls_from_paths(
            Some(PathBuf::from("cert.pem")),
            Some(PathBuf::from("key.pem"))
        )
        .unwrap()
        .is_some());
        assert!(ServerConfig::tls_from_paths(Some(PathBuf::from("cert.pem")), None).is_err());
        assert!(ServerConfig::tls_from_paths(None, Some(PathBuf::from("key.pem"))).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let config = ServerConfig {
            max_request_rate: Some(-1.0),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("max_request_rate"));

        let config = ServerConfig {
            max_request_rate: Some(f64::NAN),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_ignores_zero() {
        let config = ServerConfig {
            max_request_rate: Some(0.0),
            ..Default::default()
        };
        assert_eq!(config.rate_limit(), None);

        let config = ServerConfig {
            max_request_rate: Some(2.5),
            ..Default::default()
        };
        assert_eq!(config.rate_limit(), Some(2.5));
    }

    #[test]
    fn test_validate_rejects_bad_ice_url() {
        let config = ServerConfig {
            signaling: SignalingConfig {
                ice_server_url: Some("http://stun.example.com".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_origin() {
        let config = ServerConfig {
            allowed_origins: vec!["https://a.example".to_string(), " ".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            addr: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(
            config.socket_addr().unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
    }
}
