use std::io;
use thiserror::Error;

/// Custom error types for the network clock
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Reply too short, wrong mode or otherwise unusable
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Reply does not echo the last transmitted timestamp
    #[error("Stale reply: {0}")]
    StaleReply(String),

    /// Send or resolve failure for one server
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Timestamps that cannot describe a real round trip
    #[error("Clock anomaly: {0}")]
    ClockAnomaly(String),

    /// Server asked us to back off or go away
    #[error("Kiss-o'-death from server: {0}")]
    KissOfDeath(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new malformed reply error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedReply(msg.into())
    }

    /// Creates a new stale reply error
    pub fn stale(msg: impl Into<String>) -> Self {
        Error::StaleReply(msg.into())
    }

    /// Creates a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new clock anomaly error
    pub fn anomaly(msg: impl Into<String>) -> Self {
        Error::ClockAnomaly(msg.into())
    }

    /// Creates a new kiss-o'-death error
    pub fn kiss_of_death(code: impl Into<String>) -> Self {
        Error::KissOfDeath(code.into())
    }

    /// Whether this error describes a reply that was dropped without touching
    /// association state.
    pub fn is_discarded_reply(&self) -> bool {
        matches!(self, Error::MalformedReply(_) | Error::StaleReply(_))
    }
}
