//! Trust oracle for inbox admission.
//!
//! The trust set is built elsewhere (a web-of-trust crawl, an allow-list
//! file); the engines only ever ask "is this author trusted?". [`TrustSet`]
//! holds an immutable snapshot behind an `Arc` and swaps the whole snapshot
//! on refresh, so readers never see a half-updated set.

use crate::{Error, Result};
use outpost_core::OwnerKeys;
use outpost_core::nostr::PublicKey;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Membership test for trusted authors.
pub trait TrustOracle: Send + Sync {
    fn is_trusted(&self, pubkey: &PublicKey) -> bool;
}

impl<T: TrustOracle + ?Sized> TrustOracle for Arc<T> {
    fn is_trusted(&self, pubkey: &PublicKey) -> bool {
        (**self).is_trusted(pubkey)
    }
}

/// Refreshable snapshot of trusted public keys.
#[derive(Debug, Default)]
pub struct TrustSet {
    snapshot: RwLock<Arc<HashSet<PublicKey>>>,
}

impl TrustSet {
    pub fn new<I>(pubkeys: I) -> Self
    where
        I: IntoIterator<Item = PublicKey>,
    {
        Self {
            snapshot: RwLock::new(Arc::new(pubkeys.into_iter().collect())),
        }
    }

    /// Trust exactly the owner's own keys.
    pub fn owner_only(owner: &OwnerKeys) -> Self {
        Self::new(owner.keys().copied())
    }

    /// Load a trust file: one npub or hex key per line.
    ///
    /// Blank lines and lines starting with `#` are ignored. A line that does
    /// not decode is a configuration error naming the line number.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let pubkeys = parse_trust_list(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!(
            "Loaded {} trusted pubkeys from {}",
            pubkeys.len(),
            path.display()
        );
        Ok(Self::new(pubkeys))
    }

    /// Replace the snapshot.
    pub fn replace<I>(&self, pubkeys: I)
    where
        I: IntoIterator<Item = PublicKey>,
    {
        let next = Arc::new(pubkeys.into_iter().collect::<HashSet<_>>());
        tracing::debug!("Trust set replaced: {} pubkeys", next.len());
        *self.snapshot.write() = next;
    }

    /// Add keys to the current snapshot.
    pub fn extend<I>(&self, pubkeys: I)
    where
        I: IntoIterator<Item = PublicKey>,
    {
        let mut snapshot = self.snapshot.write();
        let mut next: HashSet<PublicKey> = (**snapshot).clone();
        next.extend(pubkeys);
        *snapshot = Arc::new(next);
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<HashSet<PublicKey>> {
        self.snapshot.read().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }
}

impl TrustOracle for TrustSet {
    fn is_trusted(&self, pubkey: &PublicKey) -> bool {
        self.snapshot.read().contains(pubkey)
    }
}

fn parse_trust_list(contents: &str) -> std::result::Result<Vec<PublicKey>, String> {
    let mut pubkeys = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let pubkey =
            PublicKey::parse(line).map_err(|e| format!("line {}: {}: {}", index + 1, line, e))?;
        pubkeys.push(pubkey);
    }
    Ok(pubkeys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::nostr::Keys;
    use outpost_core::nostr::nips::nip19::ToBech32;
    use std::io::Write;

    #[test]
    fn test_membership() {
        let trusted = Keys::generate().public_key();
        let stranger = Keys::generate().public_key();
        let set = TrustSet::new([trusted]);

        assert!(set.is_trusted(&trusted));
        assert!(!set.is_trusted(&stranger));
    }

    #[test]
    fn test_replace_swaps_snapshot() {
        let a = Keys::generate().public_key();
        let b = Keys::generate().public_key();
        let set = TrustSet::new([a]);

        let before = set.snapshot();
        set.replace([b]);

        // Readers holding the old snapshot are unaffected
        assert!(before.contains(&a));
        assert!(!set.is_trusted(&a));
        assert!(set.is_trusted(&b));
    }

    #[test]
    fn test_extend_keeps_existing() {
        let a = Keys::generate().public_key();
        let b = Keys::generate().public_key();
        let set = TrustSet::new([a]);
        set.extend([b]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_owner_only() {
        let pk = Keys::generate().public_key();
        let owner = OwnerKeys::from_keys([pk]).unwrap();
        let set = TrustSet::owner_only(&owner);
        assert!(set.is_trusted(&pk));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_load_file() {
        let a = Keys::generate().public_key();
        let b = Keys::generate().public_key();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# trusted follows").unwrap();
        writeln!(file, "{}", a.to_bech32().unwrap()).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  {}  ", b.to_hex()).unwrap();

        let set = TrustSet::load(file.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.is_trusted(&a));
        assert!(set.is_trusted(&b));
    }

    #[test]
    fn test_load_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", Keys::generate().public_key().to_hex()).unwrap();
        writeln!(file, "npub1garbage").unwrap();

        let err = TrustSet::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TrustSet::load("/nonexistent/trust.txt").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
