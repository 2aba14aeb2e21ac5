use thiserror::Error;

/// Transport-level failure talking to the agent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Agent channel closed")]
    Closed,

    #[error("Agent unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No pending request for correlation id {0}")]
    UnknownCorrelation(String),

    #[error("Replay exhausted for probe {0}")]
    ReplayExhausted(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Transport(err.to_string())
    }
}
