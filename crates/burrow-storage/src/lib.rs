//! Storage backends implementing the [`Repository`] contract.
//!
//! - [`InMemoryRepository`]: process-local, optionally mirrored to a [`FileLog`].
//! - [`PostgresRepository`]: relational, backed by `sqlx`.

pub mod file_log;
pub mod memory;
pub mod postgres;

pub use burrow_core::error::{Result, StorageError};
pub use burrow_core::{Repository, Stats, UserId, UserUrl};
pub use file_log::{FileLog, LogRecord};
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
