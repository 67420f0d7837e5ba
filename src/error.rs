use thiserror::Error;

/// Failure reported by one of the platform collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("radio error: {0}")]
    Radio(String),
    #[error("access point error: {0}")]
    AccessPoint(String),
    #[error("dns responder error: {0}")]
    Dns(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Envelope codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("could not serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Outcome of a failed `send`. The caller decides whether to retry.
#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error("send failed: {0}")]
    Transport(#[from] PlatformError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}
