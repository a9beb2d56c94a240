//! Identifier generation for pathway documents and exported FHIR resources.
//!
//! Two identifier shapes are used across the workspace:
//!
//! - [`ShortId`]: a short, URL-safe random identifier (lowercase letters and digits) used for
//!   pathway ids, node keys, transition ids and action ids. These only need to be unique
//!   within one pathway document, so generation can be checked against the keys already in
//!   use with [`ShortId::generate_unique`].
//! - [`UuidService`]: a canonical UUID (32 lowercase hexadecimal characters, no hyphens) used
//!   for exported resources that must be globally unique, such as bundles and
//!   ActivityDefinitions.
//!
//! ## Canonical UUID form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`

mod service;

// Re-export public types
pub use service::{ShortId, UuidService, SHORT_ID_LEN};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No unused identifier could be allocated
    #[error("failed to allocate a unique identifier after {0} attempts")]
    Exhausted(usize),
}

/// Result type for identifier operations.
pub type UuidResult<T> = Result<T, UuidError>;
