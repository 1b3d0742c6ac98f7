//! Error types for the autoreply service.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail transport errors (IMAP and SMTP).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Session-level failures that a fresh login may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Disconnected(_) | Self::Rejected(_)
        )
    }

    /// Whether the failure means the underlying connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Disconnected(_) | Self::Io(_))
    }
}

/// Key phrase service errors.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Text analysis request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Text analysis rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Text analysis authentication failed (status {status})")]
    AuthFailed { status: u16 },

    #[error("Invalid response from text analysis: {reason}")]
    InvalidResponse { reason: String },
}

/// Errors that stop the mailbox monitor. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Failed to connect to mailbox: {0}")]
    Connect(#[source] TransportError),

    #[error("Fetching new messages failed: {0}")]
    Fetch(#[source] TransportError),

    #[error("Waiting for mailbox changes failed: {0}")]
    Idle(#[source] TransportError),

    #[error("Gave up reconnecting after {attempts} attempts: {last}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        last: TransportError,
    },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
