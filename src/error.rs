use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
