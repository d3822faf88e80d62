use thiserror::Error;

use crate::media::CompositionError;
use crate::service::rate_limit::RateLimitError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Composition failed: {0}")]
    Composition(#[from] CompositionError),

    #[error("Rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error stems from bad caller input rather than server state.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::Expired(_) | Self::InvalidInput(_) => true,
            Self::Composition(e) => e.is_validation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
