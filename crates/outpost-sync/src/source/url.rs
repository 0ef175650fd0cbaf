//! Seed relay URL normalization.
//!
//! # Normalization Rules
//!
//! - Trim surrounding whitespace
//! - Require a websocket scheme (wss:// or ws://)
//! - Parse with nostr-sdk's `RelayUrl` (lowercases scheme and host)
//! - Remove trailing slashes
//!
//! Unlike discovered relays, seed relays are chosen by the operator, so
//! local and private addresses are allowed.

use crate::{Error, Result};
use nostr_sdk::RelayUrl;

/// Normalize a single relay URL.
///
/// # Examples
///
/// ```ignore
/// use outpost_sync::source::url::normalize_relay_url;
///
/// assert_eq!(
///     normalize_relay_url("wss://Relay.Example.COM/").unwrap(),
///     "wss://relay.example.com"
/// );
/// assert!(normalize_relay_url("https://relay.example.com").is_err());
/// ```
pub fn normalize_relay_url(url: &str) -> Result<String> {
    let url = url.trim();

    if !url.starts_with("wss://") && !url.starts_with("ws://") {
        return Err(Error::Config(format!(
            "relay URL must start with wss:// or ws://: {url}"
        )));
    }

    let parsed = RelayUrl::parse(url)
        .map_err(|e| Error::Config(format!("invalid relay URL {url}: {e}")))?;

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    Ok(normalized)
}

/// Normalize a list of seed relays, dropping blanks and duplicates.
///
/// Order is preserved (first occurrence wins). An empty result is a
/// configuration error: the engines have nowhere to fetch from.
pub fn normalize_seed_relays<I, S>(urls: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut relays: Vec<String> = Vec::new();
    for url in urls {
        let url = url.as_ref();
        if url.trim().is_empty() {
            continue;
        }
        let normalized = normalize_relay_url(url)?;
        if !relays.contains(&normalized) {
            relays.push(normalized);
        }
    }

    if relays.is_empty() {
        return Err(Error::Config("no seed relays configured".to_string()));
    }

    Ok(relays)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_removed() {
        assert_eq!(
            normalize_relay_url("wss://relay.damus.io/").unwrap(),
            "wss://relay.damus.io"
        );
        assert_eq!(
            normalize_relay_url("wss://relay.damus.io///").unwrap(),
            "wss://relay.damus.io"
        );
    }

    #[test]
    fn test_case_normalized() {
        assert_eq!(
            normalize_relay_url("wss://Relay.Damus.IO").unwrap(),
            "wss://relay.damus.io"
        );
    }

    #[test]
    fn test_path_preserved() {
        assert_eq!(
            normalize_relay_url("wss://relay.example.com/nostr").unwrap(),
            "wss://relay.example.com/nostr"
        );
    }

    #[test]
    fn test_invalid_scheme() {
        assert!(normalize_relay_url("https://relay.example.com").is_err());
        assert!(normalize_relay_url("relay.example.com").is_err());
    }

    #[test]
    fn test_local_relays_allowed() {
        assert!(normalize_relay_url("ws://localhost:7777").is_ok());
        assert!(normalize_relay_url("ws://192.168.1.10:4848").is_ok());
    }

    #[test]
    fn test_seed_relays_deduplicated_in_order() {
        let relays = normalize_seed_relays([
            "wss://nos.lol",
            " ",
            "wss://relay.damus.io/",
            "wss://NOS.lol",
        ])
        .unwrap();
        assert_eq!(relays, vec!["wss://nos.lol", "wss://relay.damus.io"]);
    }

    #[test]
    fn test_seed_relays_empty_is_error() {
        assert!(normalize_seed_relays(["", "  "]).is_err());
        assert!(normalize_seed_relays(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_seed_relays_bad_entry_is_error() {
        let err = normalize_seed_relays(["wss://nos.lol", "ftp://nope"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
