use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn codec<T: fmt::Display>(msg: T) -> Self {
        Error::Codec(msg.to_string())
    }

    pub fn proxy<T: fmt::Display>(msg: T) -> Self {
        Error::Proxy(msg.to_string())
    }
}
