//! Stateless anonymous identities carried in an HMAC-signed cookie.
//!
//! The cookie value is `hex(raw_id || HMAC-SHA256(key, raw_id))`, 72 hex
//! characters in total. Nothing is stored server-side: the user id is
//! recovered from the cookie on every request.

mod entropy;
pub mod error;
mod raw_id;
mod signer;

pub use entropy::{Entropy, OsEntropy};
pub use error::IdentityError;
pub use raw_id::{RawId, RAW_ID_LEN};
pub use signer::{CookieSigner, Identity, COOKIE_NAME, COOKIE_VALUE_LEN};
