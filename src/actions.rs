//! Owned registry of pending inline suppress actions.
//!
//! Every "suppress this item" button delivered in a DM is backed by one
//! registry entry keyed by an opaque token; the Telegram callback data
//! carries only the token. Entries expire after a bounded TTL and are purged
//! lazily on insert and lookup — no per-action background task. Expiry only
//! releases the in-memory token; a suppression already written stays.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

const CALLBACK_PREFIX: &str = "suppress:";

/// One pending suppress action, scoped to its intended subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressAction {
    pub subscriber_id: i64,
    pub item_id: String,
    pub item_name: String,
}

struct Pending {
    action: SuppressAction,
    issued_at: Instant,
}

pub struct ActionRegistry {
    ttl: Duration,
    entries: HashMap<Uuid, Pending>,
}

impl ActionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Register a pending action and return its token.
    pub fn issue(&mut self, action: SuppressAction) -> Uuid {
        self.purge_expired();
        let token = Uuid::new_v4();
        self.entries.insert(
            token,
            Pending {
                action,
                issued_at: Instant::now(),
            },
        );
        token
    }

    /// Look up a live action. Expired entries are purged first, so an expired
    /// token reads as absent.
    pub fn get(&mut self, token: &Uuid) -> Option<&SuppressAction> {
        self.purge_expired();
        self.entries.get(token).map(|pending| &pending.action)
    }

    /// Remove and return a live action. Buttons are single-use per render;
    /// consuming the token makes repeated activation a no-op.
    pub fn consume(&mut self, token: &Uuid) -> Option<SuppressAction> {
        self.purge_expired();
        self.entries.remove(token).map(|pending| pending.action)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, pending| pending.issued_at.elapsed() < ttl);
    }
}

/// Callback data attached to a suppress button.
pub fn callback_data(token: &Uuid) -> String {
    format!("{CALLBACK_PREFIX}{token}")
}

/// Inverse of [`callback_data`]. Anything else yields None.
pub fn parse_callback_data(data: &str) -> Option<Uuid> {
    data.strip_prefix(CALLBACK_PREFIX)
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(subscriber_id: i64, item_id: &str) -> SuppressAction {
        SuppressAction {
            subscriber_id,
            item_id: item_id.to_string(),
            item_name: format!("Show {item_id}"),
        }
    }

    #[test]
    fn issue_get_consume_roundtrip() {
        let mut registry = ActionRegistry::new(Duration::from_secs(3600));
        let token = registry.issue(action(42, "7"));

        assert_eq!(registry.get(&token), Some(&action(42, "7")));
        assert_eq!(registry.consume(&token), Some(action(42, "7")));
        // Consumed tokens are gone.
        assert_eq!(registry.get(&token), None);
        assert_eq!(registry.consume(&token), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_token_is_absent() {
        let mut registry = ActionRegistry::new(Duration::from_secs(3600));
        registry.issue(action(1, "a"));
        assert_eq!(registry.get(&Uuid::new_v4()), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn expired_entries_are_purged_on_lookup() {
        let mut registry = ActionRegistry::new(Duration::ZERO);
        let token = registry.issue(action(9, "3"));
        assert_eq!(registry.get(&token), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn expired_entries_are_purged_on_insert() {
        let mut registry = ActionRegistry::new(Duration::ZERO);
        registry.issue(action(1, "a"));
        registry.issue(action(2, "b"));
        // Each insert purges the prior expired entry; only the newest remains.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn callback_data_roundtrip() {
        let token = Uuid::new_v4();
        let data = callback_data(&token);
        assert_eq!(parse_callback_data(&data), Some(token));
    }

    #[test]
    fn callback_data_rejects_garbage() {
        assert_eq!(parse_callback_data("suppress:"), None);
        assert_eq!(parse_callback_data("suppress:not-a-uuid"), None);
        assert_eq!(parse_callback_data("other:1234"), None);
        assert_eq!(parse_callback_data(""), None);
    }
}
