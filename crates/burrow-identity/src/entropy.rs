use crate::raw_id::RawId;

pub trait Entropy: Send + Sync {
    /// Draws the random bytes of a new identity.
    fn raw_id(&self) -> RawId;
}

pub struct OsEntropy;

impl Entropy for OsEntropy {
    fn raw_id(&self) -> RawId {
        RawId::from_bytes(rand::random::<[u8; 4]>())
    }
}
