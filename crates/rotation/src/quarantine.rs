//! Quarantine of undecodable intents
//!
//! A corrupt intent is never retried automatically. It is moved aside with
//! its raw bytes and the key it belonged to (when that much can still be
//! read) is paused until an operator releases it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use horizon_core::CredentialKey;
use serde::{Deserialize, Serialize};

use crate::wal::WalId;

/// A WAL entry moved out of the live log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinedIntent {
    /// Original entry id
    pub id: WalId,
    /// Key recovered from the raw entry, if any
    pub key: Option<CredentialKey>,
    /// Why the entry was quarantined
    pub reason: String,
    /// Raw entry contents (lossy UTF-8)
    pub raw: String,
    /// When the entry was quarantined
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedIntent {
    /// Build a record from the raw bytes of a live entry
    pub fn from_raw(id: WalId, reason: &str, raw: &[u8]) -> Self {
        Self {
            id,
            key: key_in_raw(raw),
            reason: reason.to_string(),
            raw: String::from_utf8_lossy(raw).into_owned(),
            quarantined_at: Utc::now(),
        }
    }
}

/// Credential key named by a raw entry, if it is JSON with a valid `key`
pub(crate) fn key_in_raw(raw: &[u8]) -> Option<CredentialKey> {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get("key")?.as_str()?.parse().ok())
}

/// Keys whose rotation is paused by quarantined intents
#[derive(Debug, Default)]
pub struct PausedKeys {
    keys: DashMap<CredentialKey, Vec<WalId>>,
}

impl PausedKeys {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause `key` because of intent `id`
    pub fn pause(&self, key: CredentialKey, id: WalId) {
        let mut ids = self.keys.entry(key).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    /// Whether `key` is paused
    pub fn contains(&self, key: &CredentialKey) -> bool {
        self.keys.contains_key(key)
    }

    /// Forget intent `id`; returns the key if it is no longer paused
    pub fn release(&self, id: WalId) -> Option<CredentialKey> {
        let key = self
            .keys
            .iter()
            .find(|entry| entry.value().contains(&id))
            .map(|entry| entry.key().clone())?;

        let emptied = {
            let mut ids = self.keys.get_mut(&key)?;
            ids.retain(|held| *held != id);
            ids.is_empty()
        };
        if emptied {
            self.keys.remove(&key);
            Some(key)
        } else {
            None
        }
    }

    /// Paused keys with the intents holding them, sorted by key
    pub fn snapshot(&self) -> Vec<(CredentialKey, Vec<WalId>)> {
        let mut out: Vec<_> = self
            .keys
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Replace the set from quarantine records
    pub fn reload(&self, records: &[QuarantinedIntent]) {
        self.keys.clear();
        for record in records {
            if let Some(key) = &record.key {
                self.pause(key.clone(), record.id);
            }
        }
    }

    /// Number of paused keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether nothing is paused
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CredentialKey {
        CredentialKey::new(s).unwrap()
    }

    #[test]
    fn key_is_recovered_from_partial_json() {
        let record = QuarantinedIntent::from_raw(WalId::new(), "bad", br#"{"key":"prod","data":1}"#);
        assert_eq!(record.key, Some(key("prod")));

        let record = QuarantinedIntent::from_raw(WalId::new(), "bad", b"\xff\xfe garbage");
        assert_eq!(record.key, None);
        assert!(record.raw.contains("garbage"));
    }

    #[test]
    fn key_stays_paused_until_every_intent_is_released() {
        let paused = PausedKeys::new();
        let (first, second) = (WalId::new(), WalId::new());
        paused.pause(key("prod"), first);
        paused.pause(key("prod"), second);

        assert!(paused.contains(&key("prod")));
        assert_eq!(paused.release(first), None);
        assert!(paused.contains(&key("prod")));
        assert_eq!(paused.release(second), Some(key("prod")));
        assert!(paused.is_empty());
    }
}
