//! Internal implementation of identifier services.

use crate::{UuidError, UuidResult};
use ::uuid::Uuid;
use rand::Rng;
use std::fmt;

/// Length of generated short identifiers.
pub const SHORT_ID_LEN: usize = 9;

const SHORT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_UNIQUE_ATTEMPTS: usize = 32;

/// A random version 4 UUID that displays in canonical form (32 lowercase hex characters, no
/// hyphens).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UuidService(Uuid);

impl Default for UuidService {
    fn default() -> Self {
        Self::new()
    }
}

impl UuidService {
    /// Generates a new UUID (RFC 4122 version 4) in canonical form.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UuidService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// A short URL-safe identifier.
///
/// Generated ids are lowercase ASCII letters and digits. Short ids are what the editor hands out for new pathways, nodes, transitions and
/// actions. They are not globally unique; callers that need uniqueness inside a document
/// use [`ShortId::generate_unique`] with a predicate over the identifiers already in use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShortId(String);

impl ShortId {
    /// Generates a fresh random short id of [`SHORT_ID_LEN`] characters.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id: String = (0..SHORT_ID_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..SHORT_ID_ALPHABET.len());
                SHORT_ID_ALPHABET[idx] as char
            })
            .collect();
        Self(id)
    }

    /// Generates a short id for which `is_taken` returns `false`.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::Exhausted`] if every attempt collided with an existing id.
    pub fn generate_unique(mut is_taken: impl FnMut(&str) -> bool) -> UuidResult<Self> {
        for _attempt in 0..MAX_UNIQUE_ATTEMPTS {
            let candidate = Self::generate();
            if !is_taken(candidate.as_str()) {
                return Ok(candidate);
            }
        }
        Err(UuidError::Exhausted(MAX_UNIQUE_ATTEMPTS))
    }

    /// Checks an id supplied by the editor or an API caller.
    ///
    /// Hand-written keys such as `Start` or `T-test` are allowed, so any 1 to 64 characters
    /// drawn from ASCII letters, digits, `-` and `_` pass.
    ///
    /// # Errors
    ///
    /// Returns [`UuidError::InvalidInput`] for empty, overlong or non URL-safe input.
    pub fn parse(input: &str) -> UuidResult<Self> {
        let ok = !input.is_empty()
            && input.len() <= 64
            && input
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !ok {
            return Err(UuidError::InvalidInput(format!(
                "short id must be 1-64 URL-safe characters, got: '{}'",
                input
            )));
        }
        Ok(Self(input.to_owned()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id and returns the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_displays_canonical_form() {
        let canonical = UuidService::new().to_string();

        assert_eq!(canonical.len(), 32);
        assert!(canonical
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    }

    #[test]
    fn test_new_ids_differ() {
        assert_ne!(UuidService::new(), UuidService::new());
    }

    #[test]
    fn test_short_id_has_expected_shape() {
        let id = ShortId::generate();
        assert_eq!(id.as_str().len(), SHORT_ID_LEN);
        assert!(id
            .as_str()
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn test_short_ids_rarely_collide() {
        let ids: HashSet<String> = (0..500).map(|_| ShortId::generate().into_string()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_generate_unique_skips_taken_ids() {
        let mut seen = 0;
        let id = ShortId::generate_unique(|_| {
            seen += 1;
            seen < 3
        })
        .expect("third attempt is free");
        assert_eq!(seen, 3);
        assert_eq!(id.as_str().len(), SHORT_ID_LEN);
    }

    #[test]
    fn test_generate_unique_gives_up() {
        let err = ShortId::generate_unique(|_| true).expect_err("every id is taken");
        assert!(matches!(err, UuidError::Exhausted(_)));
    }

    #[test]
    fn test_short_id_parse_accepts_editor_keys() {
        assert!(ShortId::parse("Start").is_ok());
        assert!(ShortId::parse("T-test_1").is_ok());
        assert!(ShortId::parse("").is_err());
        assert!(ShortId::parse("has space").is_err());
        assert!(ShortId::parse(&"a".repeat(65)).is_err());
    }
}
