//! URL shortener service implementation.
//!
//! This crate wires a [`Repository`][burrow_core::Repository] backend, the
//! identity cookie signer and the background deletion daemon into the
//! [`Shortener`] facade used by request handlers.

pub mod config;
pub mod deleter;
pub mod error;
pub mod service;
pub mod shortener;

pub use config::{Settings, TrustedSubnet};
pub use deleter::{DeleteQueue, DeleteRequest, DeletionDaemon, DeletionHandle, DeletionStats};
pub use error::{ConfigError, ShortenerError};
pub use service::ShortenerService;
pub use shortener::{BatchItem, BatchShortened, ShortenOutcome, Shortener};
