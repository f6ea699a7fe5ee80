use burrow_core::{CoreError, StorageError, UserId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("short code {0} does not exist")]
    NotFound(String),
    #[error("short code {0} has been deleted")]
    Gone(String),
    #[error("user {0} has no shortened urls")]
    NoContent(UserId),
    #[error("caller is not in the trusted subnet")]
    Forbidden,
    #[error("deletion queue is closed")]
    QueueClosed,
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
        }
    }
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NoContent(user) => Self::NoContent(user),
            other => Self::Storage(other),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid subnet '{0}': expected <address>/<prefix>")]
    InvalidSubnet(String),
    #[error("subnet prefix /{prefix} is longer than {max} bits")]
    PrefixTooLong { prefix: u8, max: u8 },
}
