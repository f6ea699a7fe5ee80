use crate::error::CoreError;

/// The 62 symbols used for short codes. The index of a symbol is its digit value.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const BASE: u64 = ALPHABET.len() as u64;

/// Encodes an identifier as a base62 numeral, most significant digit first.
///
/// `0` encodes to the empty string; identifiers are allocated from `1`, so
/// every stored record has a non-empty code.
///
/// # Examples
///
/// ```
/// use burrow_core::base62;
///
/// assert_eq!(base62::encode(1), "b");
/// assert_eq!(base62::encode(62), "ba");
/// ```
pub fn encode(id: u64) -> String {
    let mut digits = Vec::new();
    let mut rest = id;
    while rest > 0 {
        digits.push(ALPHABET[(rest % BASE) as usize]);
        rest /= BASE;
    }
    digits.reverse();
    // every byte comes from ALPHABET, which is ASCII
    digits.into_iter().map(char::from).collect()
}

/// Decodes a base62 numeral back into its identifier.
///
/// Rejects the empty string, symbols outside [`ALPHABET`] and numerals that
/// do not fit in a `u64`.
pub fn decode(code: &str) -> Result<u64, CoreError> {
    if code.is_empty() {
        return Err(CoreError::InvalidShortCode(
            "short code cannot be empty".to_string(),
        ));
    }

    code.bytes().try_fold(0_u64, |acc, byte| {
        let digit = digit_of(byte).ok_or_else(|| {
            CoreError::InvalidShortCode(format!(
                "unexpected character {:?} in '{}'",
                char::from(byte),
                code
            ))
        })?;
        acc.checked_mul(BASE)
            .and_then(|value| value.checked_add(digit))
            .ok_or_else(|| CoreError::InvalidShortCode(format!("'{}' overflows u64", code)))
    })
}

fn digit_of(byte: u8) -> Option<u64> {
    let digit = match byte {
        b'a'..=b'z' => byte - b'a',
        b'A'..=b'Z' => byte - b'A' + 26,
        b'0'..=b'9' => byte - b'0' + 52,
        _ => return None,
    };
    Some(u64::from(digit))
}
