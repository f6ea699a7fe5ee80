use crate::{
    entropy::{Entropy, OsEntropy},
    error::IdentityError,
    raw_id::{RawId, RAW_ID_LEN},
};
use burrow_core::UserId;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Name of the cookie carrying the identity.
pub const COOKIE_NAME: &str = "URL-Shortener";

const SIGNATURE_LEN: usize = 32;

/// Length of the hex-encoded cookie value.
pub const COOKIE_VALUE_LEN: usize = (RAW_ID_LEN + SIGNATURE_LEN) * 2;

/// The identity resolved for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    /// A newly minted cookie value the caller must send back to the client.
    /// `None` when the request already carried a valid cookie.
    pub fresh_cookie: Option<String>,
}

impl Identity {
    pub fn is_new(&self) -> bool {
        self.fresh_cookie.is_some()
    }
}

/// Mints and verifies identity cookies with a shared HMAC key.
pub struct CookieSigner<E: Entropy = OsEntropy> {
    mac: HmacSha256,
    entropy: E,
}

impl CookieSigner<OsEntropy> {
    /// Creates a signer drawing identities from the operating system RNG.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, IdentityError> {
        Self::with_entropy(key, OsEntropy)
    }
}

impl<E: Entropy> CookieSigner<E> {
    /// Creates a signer drawing identities from `entropy`.
    ///
    /// ```
    /// use burrow_identity::{CookieSigner, Entropy, RawId};
    ///
    /// struct Fixed;
    ///
    /// impl Entropy for Fixed {
    ///     fn raw_id(&self) -> RawId {
    ///         RawId::from_bytes([0, 0, 1, 0])
    ///     }
    /// }
    ///
    /// let signer = CookieSigner::with_entropy(b"key", Fixed).unwrap();
    /// let identity = signer.mint();
    /// assert_eq!(identity.user_id.get(), 256);
    /// assert_eq!(signer.verify(identity.fresh_cookie.as_deref().unwrap()), Ok(identity.user_id));
    /// ```
    pub fn with_entropy(key: impl AsRef<[u8]>, entropy: E) -> Result<Self, IdentityError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(IdentityError::EmptyKey);
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| IdentityError::EmptyKey)?;
        Ok(Self { mac, entropy })
    }

    /// Mints a new identity together with its cookie value.
    pub fn mint(&self) -> Identity {
        let raw = self.entropy.raw_id();
        Identity {
            user_id: raw.user_id(),
            fresh_cookie: Some(self.cookie_value(raw)),
        }
    }

    /// Verifies a cookie value and returns the user it names.
    ///
    /// Only the lowercase form minted by [`CookieSigner::mint`] is accepted.
    pub fn verify(&self, value: &str) -> Result<UserId, IdentityError> {
        if value.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(IdentityError::NotHex);
        }
        let bytes = hex::decode(value).map_err(|_| IdentityError::NotHex)?;
        if bytes.len() != RAW_ID_LEN + SIGNATURE_LEN {
            return Err(IdentityError::BadLength {
                actual: bytes.len(),
                expected: RAW_ID_LEN + SIGNATURE_LEN,
            });
        }
        let (raw, signature) = bytes.split_at(RAW_ID_LEN);

        let mut mac = self.mac.clone();
        mac.update(raw);
        // constant-time comparison
        mac.verify_slice(signature)
            .map_err(|_| IdentityError::BadSignature)?;

        let mut raw_bytes = [0_u8; RAW_ID_LEN];
        raw_bytes.copy_from_slice(raw);
        Ok(RawId::from_bytes(raw_bytes).user_id())
    }

    /// Resolves the identity of a request from its cookie, if any.
    ///
    /// A missing, malformed or forged cookie is replaced by a newly minted identity.
    pub fn resolve(&self, cookie: Option<&str>) -> Identity {
        match cookie.map(|value| self.verify(value)) {
            Some(Ok(user_id)) => Identity {
                user_id,
                fresh_cookie: None,
            },
            Some(Err(_)) | None => self.mint(),
        }
    }

    fn cookie_value(&self, raw: RawId) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut payload = Vec::with_capacity(RAW_ID_LEN + SIGNATURE_LEN);
        payload.extend_from_slice(raw.as_bytes());
        payload.extend_from_slice(&signature);
        hex::encode(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::test_entropy::SequentialEntropy;

    const KEY: &[u8] = b"URL-Shortener-Key";

    fn make_signer(start: u32) -> CookieSigner<SequentialEntropy> {
        CookieSigner::with_entropy(KEY, SequentialEntropy::starting_at(start)).unwrap()
    }

    fn flip_hex_char(value: &str, at: usize) -> String {
        let mut chars: Vec<char> = value.chars().collect();
        chars[at] = if chars[at] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn minted_cookie_has_wire_shape() {
        let signer = make_signer(0xDEAD_BEEF);
        let identity = signer.mint();
        let cookie = identity.fresh_cookie.unwrap();

        assert_eq!(cookie.len(), COOKIE_VALUE_LEN);
        assert_eq!(COOKIE_VALUE_LEN, 72);
        assert!(cookie.starts_with("deadbeef"));
        assert!(cookie
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(identity.user_id.get(), 0xDEAD_BEEF);
    }

    #[test]
    fn minted_cookie_verifies() {
        let signer = make_signer(42);
        let identity = signer.mint();
        let cookie = identity.fresh_cookie.clone().unwrap();

        assert_eq!(signer.verify(&cookie), Ok(identity.user_id));
    }

    #[test]
    fn signature_matches_reference_hmac() {
        let signer = make_signer(1);
        let cookie = signer.mint().fresh_cookie.unwrap();

        let mut mac = HmacSha256::new_from_slice(KEY).unwrap();
        mac.update(&[0, 0, 0, 1]);
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(&cookie[8..], expected);
    }

    #[test]
    fn tampering_any_character_is_rejected() {
        let signer = make_signer(7);
        let cookie = signer.mint().fresh_cookie.unwrap();

        for at in 0..cookie.len() {
            let forged = flip_hex_char(&cookie, at);
            assert!(signer.verify(&forged).is_err(), "position {at} accepted");
        }
    }

    #[test]
    fn uppercased_character_is_rejected() {
        let signer = make_signer(0xABCD_EF01);
        let cookie = signer.mint().fresh_cookie.unwrap();

        for (at, c) in cookie.char_indices().filter(|(_, c)| c.is_ascii_lowercase()) {
            let mut forged = cookie.clone();
            forged.replace_range(at..at + 1, &c.to_ascii_uppercase().to_string());
            assert_eq!(signer.verify(&forged), Err(IdentityError::NotHex), "position {at}");
        }
        assert_eq!(
            signer.verify(&cookie.to_ascii_uppercase()),
            Err(IdentityError::NotHex)
        );
    }

    #[test]
    fn resolve_reuses_valid_cookie() {
        let signer = make_signer(100);
        let first = signer.mint();
        let cookie = first.fresh_cookie.clone().unwrap();

        let again = signer.resolve(Some(&cookie));
        assert_eq!(again.user_id, first.user_id);
        assert!(!again.is_new());
    }

    #[test]
    fn resolve_mints_when_cookie_missing() {
        let signer = make_signer(100);
        let identity = signer.resolve(None);
        assert!(identity.is_new());
        assert_eq!(identity.user_id.get(), 100);
    }

    #[test]
    fn resolve_replaces_tampered_cookie() {
        let signer = make_signer(100);
        let original = signer.mint();
        let forged = flip_hex_char(original.fresh_cookie.as_deref().unwrap(), 3);

        let identity = signer.resolve(Some(&forged));
        assert!(identity.is_new());
        assert_ne!(identity.user_id, original.user_id);
        assert_ne!(identity.fresh_cookie.as_deref(), Some(forged.as_str()));
    }

    #[test]
    fn cookie_from_another_key_is_rejected() {
        let ours = make_signer(5);
        let theirs = CookieSigner::with_entropy(b"other-key", SequentialEntropy::starting_at(5))
            .unwrap();
        let cookie = theirs.mint().fresh_cookie.unwrap();

        assert_eq!(ours.verify(&cookie), Err(IdentityError::BadSignature));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let signer = make_signer(0);
        assert_eq!(signer.verify("not hex"), Err(IdentityError::NotHex));
        assert_eq!(
            signer.verify("abcd"),
            Err(IdentityError::BadLength {
                actual: 2,
                expected: 36
            })
        );
        assert_eq!(
            signer.verify(""),
            Err(IdentityError::BadLength {
                actual: 0,
                expected: 36
            })
        );
    }

    #[test]
    fn empty_key_is_refused() {
        assert!(matches!(
            CookieSigner::new(b""),
            Err(IdentityError::EmptyKey)
        ));
    }

    #[test]
    fn os_entropy_signer_round_trips() {
        let signer = CookieSigner::new(KEY).unwrap();
        let identity = signer.resolve(None);
        let cookie = identity.fresh_cookie.clone().unwrap();
        assert_eq!(signer.resolve(Some(&cookie)).user_id, identity.user_id);
    }
}
