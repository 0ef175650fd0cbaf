//! Inbox notification classification.
//!
//! Every accepted inbox event maps to exactly one [`InboxKind`]. The mapping
//! is a pure function of the event kind; unknown kinds fall through to
//! [`InboxKind::Other`].

use nostr::{Event, Kind};
use std::fmt;

/// NIP-01 short text note.
pub const KIND_TEXT_NOTE: u16 = 1;
/// NIP-02 follow list.
pub const KIND_FOLLOW_LIST: u16 = 3;
/// NIP-04 encrypted direct message.
pub const KIND_ENCRYPTED_DM: u16 = 4;
/// NIP-18 repost.
pub const KIND_REPOST: u16 = 6;
/// NIP-25 reaction.
pub const KIND_REACTION: u16 = 7;
/// NIP-57 zap receipt.
pub const KIND_ZAP_RECEIPT: u16 = 9735;

/// Classification of an inbox event for notification purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboxKind {
    Note,
    Reaction,
    Zap,
    EncryptedMessage,
    Repost,
    /// Follow lists land in the inbox silently.
    FollowList,
    Other,
}

impl InboxKind {
    /// Classify an event kind.
    pub fn classify(kind: Kind) -> Self {
        match kind.as_u16() {
            KIND_TEXT_NOTE => Self::Note,
            KIND_REACTION => Self::Reaction,
            KIND_ZAP_RECEIPT => Self::Zap,
            KIND_ENCRYPTED_DM => Self::EncryptedMessage,
            KIND_REPOST => Self::Repost,
            KIND_FOLLOW_LIST => Self::FollowList,
            _ => Self::Other,
        }
    }

    /// Whether events of this class produce a notification.
    pub fn notifies(&self) -> bool {
        !matches!(self, Self::FollowList)
    }

    /// Stable label for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Reaction => "reaction",
            Self::Zap => "zap",
            Self::EncryptedMessage => "encrypted_message",
            Self::Repost => "repost",
            Self::FollowList => "follow_list",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for InboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-facing notice about a new inbox event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: InboxKind,
    pub event_id: nostr::EventId,
    pub author: nostr::PublicKey,
    /// Human-readable line, e.g. "⚡️ new zap in your inbox".
    pub message: String,
}

impl Notification {
    /// Build the notification for an accepted event, if its class notifies.
    pub fn for_event(event: &Event) -> Option<Self> {
        let kind = InboxKind::classify(event.kind);
        let message = match kind {
            InboxKind::Note => "📰 new note in your inbox".to_string(),
            InboxKind::Reaction => format!("{} new reaction in your inbox", event.content),
            InboxKind::Zap => "⚡️ new zap in your inbox".to_string(),
            InboxKind::EncryptedMessage => "🔒 new encrypted message in your inbox".to_string(),
            InboxKind::Repost => "🔁 new repost in your inbox".to_string(),
            InboxKind::FollowList => return None,
            InboxKind::Other => "📦 new event in your inbox".to_string(),
        };
        Some(Self {
            kind,
            event_id: event.id,
            author: event.pubkey,
            message,
        })
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{EventBuilder, Keys};

    fn signed(kind: u16, content: &str) -> Event {
        EventBuilder::new(Kind::from(kind), content)
            .sign_with_keys(&Keys::generate())
            .unwrap()
    }

    #[test]
    fn test_classify_known_kinds() {
        assert_eq!(InboxKind::classify(Kind::from(1)), InboxKind::Note);
        assert_eq!(InboxKind::classify(Kind::from(3)), InboxKind::FollowList);
        assert_eq!(InboxKind::classify(Kind::from(4)), InboxKind::EncryptedMessage);
        assert_eq!(InboxKind::classify(Kind::from(6)), InboxKind::Repost);
        assert_eq!(InboxKind::classify(Kind::from(7)), InboxKind::Reaction);
        assert_eq!(InboxKind::classify(Kind::from(9735)), InboxKind::Zap);
    }

    #[test]
    fn test_classify_is_total_and_deterministic() {
        for raw in 0..=u16::MAX {
            let first = InboxKind::classify(Kind::from(raw));
            let second = InboxKind::classify(Kind::from(raw));
            assert_eq!(first, second);
        }
        assert_eq!(InboxKind::classify(Kind::from(30023)), InboxKind::Other);
        assert_eq!(InboxKind::classify(Kind::from(0)), InboxKind::Other);
    }

    #[test]
    fn test_reaction_notification_includes_content() {
        let event = signed(KIND_REACTION, "🔥");
        let notification = Notification::for_event(&event).unwrap();
        assert_eq!(notification.kind, InboxKind::Reaction);
        assert!(notification.message.contains("🔥"));
        assert_eq!(notification.event_id, event.id);
    }

    #[test]
    fn test_follow_list_is_suppressed() {
        let event = signed(KIND_FOLLOW_LIST, "");
        assert!(Notification::for_event(&event).is_none());
        assert!(!InboxKind::FollowList.notifies());
    }

    #[test]
    fn test_every_other_class_notifies() {
        for (kind, expected) in [
            (KIND_TEXT_NOTE, "new note"),
            (KIND_ZAP_RECEIPT, "new zap"),
            (KIND_ENCRYPTED_DM, "new encrypted message"),
            (KIND_REPOST, "new repost"),
            (1984, "new event"),
        ] {
            let notification = Notification::for_event(&signed(kind, "x")).unwrap();
            assert!(
                notification.message.contains(expected),
                "kind {kind}: {}",
                notification.message
            );
        }
    }
}
