//! Error types for audio capture

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AudioError>;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Audio stream error: {0}")]
    StreamError(String),

    #[error("Audio device closed: {0}")]
    DeviceClosed(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Transform error: {0}")]
    TransformError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Already capturing")]
    AlreadyCapturing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AudioError {
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    pub fn stream<S: Into<String>>(msg: S) -> Self {
        Self::StreamError(msg.into())
    }

    pub fn invalid_frame<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFrame(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Frame-level errors drop a single frame; capture continues
    pub fn is_frame_level(&self) -> bool {
        matches!(self, Self::InvalidFrame(_) | Self::TransformError(_))
    }
}

impl From<realfft::FftError> for AudioError {
    fn from(err: realfft::FftError) -> Self {
        Self::TransformError(err.to_string())
    }
}
