use thiserror::Error;

#[derive(Error, Debug)]
pub enum BroadcasterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broadcaster not started")]
    NotStarted,

    #[error("Broadcaster already running")]
    AlreadyRunning,
}

/// Why a single delivery attempt failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("client connection closed")]
    Closed,

    #[error("client outbound queue full")]
    Backlogged,
}

pub type Result<T> = std::result::Result<T, BroadcasterError>;
