use crate::base62;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt::Display;

/// A short code: the base62 form of a record identifier.
///
/// A `ShortCode` always decodes to a non-zero identifier, so it can be
/// turned back into the key of the record it was created for.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ShortCode {
    code: SmolStr,
    id: u64,
}

impl ShortCode {
    /// Creates the short code for a record identifier.
    ///
    /// Identifiers start at `1`; passing `0` yields a code whose text is empty.
    pub fn from_id(id: u64) -> Self {
        Self {
            code: SmolStr::new(base62::encode(id)),
            id,
        }
    }

    /// Parses a short code received from a client.
    pub fn parse(code: &str) -> Result<Self, CoreError> {
        let id = base62::decode(code)?;
        if id == 0 {
            return Err(CoreError::InvalidShortCode(format!(
                "'{}' does not name a record",
                code
            )));
        }
        Ok(Self {
            code: SmolStr::new(code),
            id,
        })
    }

    /// Returns the record identifier this code stands for.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the short code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// Generates the full shortened URL based on the provided base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self)
    }
}

impl std::fmt::Debug for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortCode")
            .field("code", &self.code)
            .field("id", &self.id)
            .finish()
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

impl Serialize for ShortCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.code.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ShortCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = SmolStr::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
