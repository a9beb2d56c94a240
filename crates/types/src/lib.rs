//! Validated primitive types shared across the pathway crates.

#[derive(Debug, thiserror::Error)]
pub enum TextError {
    #[error("text cannot be empty")]
    Empty,
}

/// Free text with at least one non-whitespace character, stored trimmed.
///
/// Pathway names go through this before a pathway is created, since an empty name would
/// silently turn into fallback library names on export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] if the trimmed input is empty.
    pub fn new(input: &str) -> Result<Self, TextError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A legal, unquoted CQL identifier derived from a free-text label.
///
/// Pathway names and node keys are free text, but the library names written into
/// `library <name> version '<v>'` headers must be plain identifiers. Construction keeps
/// ASCII letters, digits and underscores, drops everything else, and prefixes the result
/// with `fallback` when it would otherwise be empty or start with a digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CqlIdentifier(String);

impl CqlIdentifier {
    pub fn from_label(label: &str, fallback: &str) -> Self {
        let cleaned: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();

        match cleaned.chars().next() {
            None => Self(fallback.to_owned()),
            Some(c) if c.is_ascii_digit() => Self(format!("{fallback}{cleaned}")),
            Some(_) => Self(cleaned),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CqlIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
