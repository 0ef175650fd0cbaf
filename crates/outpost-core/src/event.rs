//! Owner identity and reference-tag helpers.
//!
//! The owner identity is configured as one or more `npub` strings (hex is
//! accepted too). Inbox acceptance compares `p` tag values against the hex
//! form of those keys, so both forms are kept side by side.

use crate::error::{Error, Result};
use nostr::{Event, PublicKey};
use std::collections::HashSet;

/// Tag name used for references to another identity (NIP-01 `p` tag).
pub const REFERENCE_TAG: &str = "p";

/// Single-letter form of [`REFERENCE_TAG`], as used in `#p` filters.
pub const REFERENCE_TAG_LETTER: char = 'p';

/// The set of public keys that together make up the owner identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerKeys {
    keys: HashSet<PublicKey>,
    hex: HashSet<String>,
}

impl OwnerKeys {
    /// Decode owner identities (npub or hex) into a key set.
    ///
    /// Blank entries are skipped. Any entry that fails to decode is an error:
    /// a typo in the owner identity must stop the run before anything is
    /// fetched.
    pub fn parse<I, S>(identities: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys = HashSet::new();
        for identity in identities {
            let identity = identity.as_ref().trim();
            if identity.is_empty() {
                continue;
            }
            let key = PublicKey::parse(identity).map_err(|source| Error::InvalidPublicKey {
                input: identity.to_string(),
                source,
            })?;
            keys.insert(key);
        }
        Self::from_keys(keys)
    }

    /// Build from already-decoded keys.
    pub fn from_keys<I>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = PublicKey>,
    {
        let keys: HashSet<PublicKey> = keys.into_iter().collect();
        if keys.is_empty() {
            return Err(Error::NoOwnerKeys);
        }
        let hex = keys.iter().map(|k| k.to_hex()).collect();
        Ok(Self { keys, hex })
    }

    /// Iterate over the decoded keys.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.keys.iter()
    }

    /// Hex form of every owner key, as it appears in `p` tags.
    pub fn hex_values(&self) -> impl Iterator<Item = &str> {
        self.hex.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether a raw `p` tag value names one of the owner keys.
    pub fn contains_value(&self, value: &str) -> bool {
        self.hex.contains(value)
    }

    /// Whether the event was authored by the owner.
    pub fn is_author_of(&self, event: &Event) -> bool {
        self.keys.contains(&event.pubkey)
    }
}

/// Values of every reference tag on the event.
///
/// Tags with fewer than two elements carry no value and are skipped.
pub fn reference_values(event: &Event) -> impl Iterator<Item = &str> {
    event.tags.iter().filter_map(|tag| match tag.as_slice() {
        [name, value, ..] if name == REFERENCE_TAG => Some(value.as_str()),
        _ => None,
    })
}

/// Whether any reference tag on the event points at the owner.
///
/// This is the local, authoritative check: relays that ignore or loosen the
/// `#p` filter still can't get an event into the inbox.
pub fn references_owner(event: &Event, owner: &OwnerKeys) -> bool {
    reference_values(event).any(|value| owner.contains_value(value))
}
