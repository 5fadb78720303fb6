use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("failed to decode stream payload: {0}")]
    Decode(String),

    #[error("last turn is not an assistant turn")]
    NoAssistantTurn,

    #[error("a response is already being generated")]
    Busy,
}

impl ChatError {
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
