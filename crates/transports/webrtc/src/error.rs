//! Error types for the echo signaling server

use std::time::Duration;

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating, tracking, or serving sessions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request body is not a session description
    #[error("Malformed offer: {0}")]
    MalformedOffer(String),

    /// Engine setting could not be applied; negotiation continues without it
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Engine refused to construct a session
    #[error("Session creation failed: {0}")]
    SessionCreationFailed(String),

    /// Remote description could not be applied
    #[error("Remote description rejected: {0}")]
    RemoteDescriptionRejected(String),

    /// Engine could not produce an answer
    #[error("Answer generation failed: {0}")]
    AnswerGenerationFailed(String),

    /// Local description could not be applied
    #[error("Local description rejected: {0}")]
    LocalDescriptionRejected(String),

    /// Candidate gathering did not complete within the configured bound
    #[error("Candidate gathering timed out after {0:?}")]
    GatheringTimedOut(Duration),

    /// Finalized local description could not be produced or encoded
    #[error("Response serialization failed: {0}")]
    ResponseSerializationFailed(String),

    /// Echoing a data channel message failed
    #[error("Echo send failed: {0}")]
    EchoSendFailed(String),

    /// Session did not close cleanly (it is still dropped from the registry)
    #[error("Close failed: {0}")]
    CloseFailed(String),

    /// Invalid startup configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP server bind/serve error
    #[error("Server error: {0}")]
    Server(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error ends the operation that raised it.
    ///
    /// Non-fatal errors are logged and processing continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Configuration(_) | Error::EchoSendFailed(_) | Error::CloseFailed(_)
        )
    }

    /// Whether the request itself was at fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::MalformedOffer(_))
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedOffer(_) => "malformed_offer",
            Error::Configuration(_) => "configuration",
            Error::SessionCreationFailed(_) => "session_creation_failed",
            Error::RemoteDescriptionRejected(_) => "remote_description_rejected",
            Error::AnswerGenerationFailed(_) => "answer_generation_failed",
            Error::LocalDescriptionRejected(_) => "local_description_rejected",
            Error::GatheringTimedOut(_) => "gathering_timed_out",
            Error::ResponseSerializationFailed(_) => "response_serialization_failed",
            Error::EchoSendFailed(_) => "echo_send_failed",
            Error::CloseFailed(_) => "close_failed",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Server(_) => "server",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}
