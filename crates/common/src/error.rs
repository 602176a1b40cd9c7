use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotgateError {
    #[error("state file error: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type BotgateResult<T> = Result<T, BotgateError>;
