//! Subscription filters.
//!
//! [`SyncFilter`] is the filter shape the sync engines work with: optional
//! authors, optional single-letter tag constraints, and an optional time
//! range. It converts to a [`nostr::Filter`] for the relay request and can
//! also be matched locally, which is what the in-memory store and source use.
//!
//! Semantics follow NIP-01: AND across fields, OR within a field's values,
//! and `since`/`until` are both inclusive.

use crate::error::{Error, Result};
use crate::event::REFERENCE_TAG_LETTER;
use nostr::{Event, PublicKey, SingleLetterTag, Timestamp};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Filter criteria for one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncFilter {
    /// Event authors (any of).
    pub authors: Option<HashSet<PublicKey>>,
    /// Single-letter tag name -> accepted values (any of, per tag).
    pub tags: BTreeMap<char, BTreeSet<String>>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<Timestamp>,
    /// Inclusive upper bound on `created_at`.
    pub until: Option<Timestamp>,
}

impl SyncFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to events by any of these authors.
    pub fn authors<'a, I>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = &'a PublicKey>,
    {
        self.authors
            .get_or_insert_with(HashSet::new)
            .extend(authors.into_iter().copied());
        self
    }

    /// Restrict to events carrying a `p` tag with any of these values.
    pub fn references<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag(REFERENCE_TAG_LETTER, values)
    }

    /// Restrict to events carrying tag `letter` with any of these values.
    pub fn tag<I, S>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(letter)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    /// Whether the filter has no constraint at all.
    pub fn is_empty(&self) -> bool {
        self.authors.is_none() && self.tags.is_empty() && self.since.is_none() && self.until.is_none()
    }

    /// Check the filter invariants.
    ///
    /// A filter must carry at least one constraint, value sets must not be
    /// empty (an empty set would match nothing on some relays and everything
    /// on others), and the time range must not be inverted.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::InvalidFilter("filter has no constraints".to_string()));
        }
        if matches!(&self.authors, Some(authors) if authors.is_empty()) {
            return Err(Error::InvalidFilter("empty author set".to_string()));
        }
        if let Some((letter, _)) = self.tags.iter().find(|(_, values)| values.is_empty()) {
            return Err(Error::InvalidFilter(format!("empty value set for tag '{letter}'")));
        }
        if let (Some(since), Some(until)) = (self.since, self.until)
            && until < since
        {
            return Err(Error::InvalidFilter(format!(
                "until ({}) is before since ({})",
                until.as_u64(),
                since.as_u64()
            )));
        }
        Ok(())
    }

    /// Match an event locally.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(authors) = &self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }
        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }
        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }
        self.tags
            .iter()
            .all(|(letter, values)| has_tag_value(event, *letter, values))
    }

    /// Build the relay-side filter.
    pub fn to_nostr(&self) -> Result<nostr::Filter> {
        self.validate()?;

        let mut filter = nostr::Filter::new();
        if let Some(authors) = &self.authors {
            filter = filter.authors(authors.iter().copied());
        }
        for (letter, values) in &self.tags {
            let tag = SingleLetterTag::from_char(*letter)
                .map_err(|e| Error::InvalidFilter(format!("tag '{letter}': {e}")))?;
            filter = filter.custom_tags(tag, values.iter().cloned());
        }
        if let Some(since) = self.since {
            filter = filter.since(since);
        }
        if let Some(until) = self.until {
            filter = filter.until(until);
        }
        Ok(filter)
    }
}

fn has_tag_value(event: &Event, letter: char, values: &BTreeSet<String>) -> bool {
    let mut buf = [0u8; 4];
    let name: &str = letter.encode_utf8(&mut buf);
    event.tags.iter().any(|tag| match tag.as_slice() {
        [tag_name, value, ..] => tag_name == name && values.contains(value),
        _ => false,
    })
}

/// Filter for events that reference any owner key.
pub fn owner_reference_filter<'a, I>(owner_hex: I) -> SyncFilter
where
    I: IntoIterator<Item = &'a str>,
{
    SyncFilter::new().references(owner_hex)
}
