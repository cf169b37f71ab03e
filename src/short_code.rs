use std::fmt;

use thiserror::Error;

/// Characters a generated [`ShortCode`] is drawn from.
pub const ALPHABET: &[u8; 62] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Longest code the `short_urls.short_code` column can hold.
pub const MAX_LEN: usize = 16;

// Largest multiple of ALPHABET.len() that fits in a byte; bytes at or above it are redrawn.
const REJECTION_BOUND: u8 = 248;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortCodeValidationError {
    #[error("short code must not be empty")]
    Empty,
    #[error("short code is {len} characters long; the maximum is {max}")]
    TooLong { len: usize, max: usize },
    #[error("short code contains invalid characters: {invalid_chars}")]
    InvalidCharacters { invalid_chars: String },
}

impl ShortCode {
    /// # Errors
    /// Returns [`Err`] unless `code` is 1 to [`MAX_LEN`] ASCII alphanumerics.
    pub fn new(code: String) -> Result<Self, ShortCodeValidationError> {
        if code.is_empty() {
            return Err(ShortCodeValidationError::Empty);
        }

        let invalid_chars: String = code.chars().filter(|c| !c.is_ascii_alphanumeric()).collect();
        if !invalid_chars.is_empty() {
            return Err(ShortCodeValidationError::InvalidCharacters { invalid_chars });
        }

        if code.len() > MAX_LEN {
            return Err(ShortCodeValidationError::TooLong {
                len: code.len(),
                max: MAX_LEN,
            });
        }

        Ok(Self(code))
    }

    /// Samples a fresh candidate of `len` characters using the thread-local RNG.
    #[must_use]
    pub fn generate(len: usize) -> Self {
        Self::generate_with(len, rand::random::<u8>)
    }

    /// Samples a candidate of `len` characters, pulling randomness from `next_byte`.
    ///
    /// Bytes are mapped onto [`ALPHABET`] with rejection sampling so every
    /// character is equally likely. `len` is clamped to `1..=MAX_LEN`.
    pub fn generate_with(len: usize, mut next_byte: impl FnMut() -> u8) -> Self {
        let len = len.clamp(1, MAX_LEN);
        let mut code = String::with_capacity(len);
        while code.len() < len {
            let byte = next_byte();
            if byte < REJECTION_BOUND {
                code.push(char::from(ALPHABET[usize::from(byte) % ALPHABET.len()]));
            }
        }
        Self(code)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_new_accepts_alphanumerics() {
        let code = ShortCode::new("abc123XYZ".to_owned()).unwrap();
        assert_eq!(code.as_str(), "abc123XYZ");
        assert_eq!(code.to_string(), "abc123XYZ");
    }

    #[test]
    fn test_new_rejects_empty() {
        assert_eq!(
            ShortCode::new(String::new()),
            Err(ShortCodeValidationError::Empty)
        );
    }

    #[test]
    fn test_new_rejects_invalid_characters() {
        assert_eq!(
            ShortCode::new("bad_code-1".to_owned()),
            Err(ShortCodeValidationError::InvalidCharacters {
                invalid_chars: "_-".to_owned()
            })
        );
    }

    #[test]
    fn test_new_rejects_too_long() {
        assert_eq!(
            ShortCode::new("a".repeat(MAX_LEN + 1)),
            Err(ShortCodeValidationError::TooLong {
                len: MAX_LEN + 1,
                max: MAX_LEN
            })
        );
        assert!(ShortCode::new("a".repeat(MAX_LEN)).is_ok());
    }

    #[test]
    fn test_generate_has_requested_length_and_alphabet() {
        for len in [1, 6, 8, MAX_LEN] {
            let code = ShortCode::generate(len);
            assert_eq!(code.as_str().len(), len);
            assert!(code.as_str().bytes().all(|b| ALPHABET.contains(&b)));
            assert_eq!(ShortCode::new(code.as_str().to_owned()).unwrap(), code);
        }
    }

    #[test]
    fn test_generate_clamps_length() {
        assert_eq!(ShortCode::generate(0).as_str().len(), 1);
        assert_eq!(ShortCode::generate(100).as_str().len(), MAX_LEN);
    }

    #[test]
    fn test_generate_with_maps_bytes_onto_alphabet() {
        let mut bytes = [0, 25, 26, 51, 52].into_iter();
        let code = ShortCode::generate_with(5, || bytes.next().unwrap());
        assert_eq!(code.as_str(), "AZaz0");
    }

    #[test]
    fn test_generate_with_rejects_biased_bytes() {
        let mut bytes = [255, 248, 1, 250, 2].into_iter();
        let code = ShortCode::generate_with(2, || bytes.next().unwrap());
        assert_eq!(code.as_str(), "BC");
    }

    #[test]
    fn test_generate_produces_distinct_codes() {
        let codes: HashSet<_> = (0..1000).map(|_| ShortCode::generate(8)).collect();
        assert_eq!(codes.len(), 1000);
    }
}
