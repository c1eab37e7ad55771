//! Error types for workout playback.

use thiserror::Error;

/// Failures surfaced by backends, the remote session manager, and the controller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    /// Media failed to load or play on the active backend.
    #[error("failed to load media: {0}")]
    Load(String),

    /// A remote operation was attempted without a connected receiver.
    #[error("no remote receiver is connected")]
    NotConnected,

    /// A connect was requested while no receiver has been discovered.
    #[error("no remote receiver is available")]
    ReceiverUnavailable,

    /// The receiver rejected or dropped the connect handshake.
    #[error("remote connect failed: {0}")]
    Connect(String),

    /// The workout document does not describe a playable sequence.
    #[error("invalid workout: {0}")]
    InvalidWorkout(String),
}

/// Error categories reported to the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Load,
    NotConnected,
    ReceiverUnavailable,
    Connect,
    InvalidWorkout,
}

impl PlaybackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybackError::Load(_) => ErrorKind::Load,
            PlaybackError::NotConnected => ErrorKind::NotConnected,
            PlaybackError::ReceiverUnavailable => ErrorKind::ReceiverUnavailable,
            PlaybackError::Connect(_) => ErrorKind::Connect,
            PlaybackError::InvalidWorkout(_) => ErrorKind::InvalidWorkout,
        }
    }
}

/// Failures while reading or writing `config.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
