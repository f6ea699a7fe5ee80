use burrow_core::UserId;
use std::fmt;

/// Length in bytes of the random part of an identity.
pub const RAW_ID_LEN: usize = 4;

/// The random bytes an identity cookie is minted from.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawId([u8; RAW_ID_LEN]);

impl RawId {
    pub const fn from_bytes(bytes: [u8; RAW_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn into_bytes(self) -> [u8; RAW_ID_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The numeric user id: all four bytes read big-endian.
    pub fn user_id(&self) -> UserId {
        UserId::new(u64::from(u32::from_be_bytes(self.0)))
    }
}

impl fmt::Debug for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawId").field(&hex::encode(self.0)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_uses_all_bytes() {
        let raw = RawId::from_bytes([0x01, 0x02, 0x03, 0x04]);
        assert_eq!(raw.user_id().get(), 0x0102_0304);
    }

    #[test]
    fn ids_differing_only_in_high_bytes_stay_distinct() {
        let a = RawId::from_bytes([0x00, 0x01, 0xAB, 0xCD]);
        let b = RawId::from_bytes([0x00, 0x02, 0xAB, 0xCD]);
        assert_ne!(a.user_id(), b.user_id());
    }
}
