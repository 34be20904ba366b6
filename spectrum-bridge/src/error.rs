//! Bridge error types

use spectrum_audio::AudioError;
use spectrum_broadcaster::BroadcasterError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("External service at {addr} unavailable: {reason}")]
    ExternalService { addr: String, reason: String },

    #[error("Audio device error: {0}")]
    Device(#[source] AudioError),

    #[error("Failed to bind WebSocket server: {0}")]
    Bind(#[source] BroadcasterError),

    #[error("Audio device lost: {0}")]
    DeviceLost(String),
}

impl BridgeError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn external<A: Into<String>, R: ToString>(addr: A, reason: R) -> Self {
        Self::ExternalService {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that abort startup before the bridge reaches `Running`
    pub fn is_fatal_startup(&self) -> bool {
        !matches!(self, Self::DeviceLost(_))
    }
}

impl From<AudioError> for BridgeError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::InvalidConfig(msg) => Self::Config(msg),
            other => Self::Device(other),
        }
    }
}
