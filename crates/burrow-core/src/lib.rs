//! Core types and traits for the Burrow URL shortener.
//!
//! This crate provides the short code codec, the repository contract and
//! the error types shared by the storage backends and the shortener service.

pub mod base62;
pub mod error;
pub mod repository;
pub mod shortcode;

pub use error::{CoreError, StorageError};
pub use repository::{Repository, Stats, UrlRecord, UserId, UserUrl};
pub use shortcode::ShortCode;
