use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlacklogError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("serialize error: {0}")]
    Serialize(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SlacklogError>;
