//! Error types for the Outpost core types.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building filters, windows and owner identities.
#[derive(Error, Debug)]
pub enum Error {
    /// A calendar date could not be parsed.
    #[error("invalid date '{input}': {reason}")]
    InvalidDate {
        /// The string we tried to parse.
        input: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// An owner or trusted identity could not be decoded into a public key.
    #[error("invalid public key '{input}': {source}")]
    InvalidPublicKey {
        /// The npub/hex string we tried to decode.
        input: String,
        /// Underlying key error from the nostr crate.
        #[source]
        source: nostr::key::Error,
    },

    /// The owner identity resolved to no keys at all.
    #[error("owner identity resolved to no public keys")]
    NoOwnerKeys,

    /// A filter has no constraint, or a constraint that can't be expressed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A time window would be empty or inverted.
    #[error("invalid time window: {0}")]
    InvalidWindow(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_date_display() {
        let err = Error::InvalidDate {
            input: "2024-13-01".to_string(),
            reason: "input is out of range".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2024-13-01"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_invalid_public_key_display() {
        let source = nostr::PublicKey::parse("npub1nope").unwrap_err();
        let err = Error::InvalidPublicKey {
            input: "npub1nope".to_string(),
            source,
        };
        assert!(err.to_string().contains("npub1nope"));
    }

    #[test]
    fn test_invalid_filter_display() {
        let err = Error::InvalidFilter("no constraints".to_string());
        assert_eq!(err.to_string(), "invalid filter: no constraints");
    }
}
