use thiserror::Error;

/// Errors returned when an identity cookie cannot be trusted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("cookie is not valid lowercase hex")]
    NotHex,
    #[error("cookie carries {actual} bytes; expected {expected}")]
    BadLength { actual: usize, expected: usize },
    #[error("cookie signature does not match")]
    BadSignature,
    #[error("signing key is empty")]
    EmptyKey,
}
