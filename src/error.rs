use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid endpoint url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported endpoint scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("connection closed")]
    Closed,

    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
}

/// Reasons the composer refused to emit an outbound message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("nothing to send")]
    Empty,

    #[error("websocket not connected")]
    Disconnected,

    #[error("still waiting for the previous reply")]
    AwaitingReply,
}
