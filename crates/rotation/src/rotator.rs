//! Seam between the scheduler and the credential owner

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_core::{CredentialKey, SecretString};

use crate::error::RotationResult;
use crate::wal::RotationIntent;

/// What the scheduler needs to know about one rotatable credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationRecord {
    /// Principal whose credential is rotated
    pub principal: String,
    /// Rotation period; `None` for manually rotated credentials
    pub interval: Option<Duration>,
    /// Last committed rotation
    pub last_rotation: Option<DateTime<Utc>>,
    /// Generation policy for the new value
    pub policy: Option<String>,
}

impl RotationRecord {
    /// When the next periodic rotation is due
    ///
    /// `None` if the credential does not rotate periodically. A credential
    /// that was never rotated is due at `now`.
    pub fn next_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let interval = chrono::Duration::from_std(self.interval?).ok()?;
        Some(match self.last_rotation {
            Some(last) => last + interval,
            None => now,
        })
    }
}

/// Owner of the durable credential records and of the remote side
///
/// Every method except [`list_records`](Self::list_records) is called while
/// the key's lock entry is held.
#[async_trait]
pub trait CredentialRotator: Send + Sync {
    /// All durable records, rotating or not
    async fn list_records(&self) -> RotationResult<Vec<(CredentialKey, RotationRecord)>>;

    /// Current durable record for `key`
    async fn load(&self, key: &CredentialKey) -> RotationResult<Option<RotationRecord>>;

    /// Produce a new credential value
    async fn generate(
        &self,
        key: &CredentialKey,
        record: &RotationRecord,
    ) -> RotationResult<SecretString>;

    /// Apply the intent's value on the identity service
    ///
    /// May be delivered more than once for the same intent.
    async fn apply(&self, record: &RotationRecord, intent: &RotationIntent) -> RotationResult<()>;

    /// Durably record the intent's value as the live credential
    async fn commit(
        &self,
        record: &RotationRecord,
        intent: &RotationIntent,
        rotated_at: DateTime<Utc>,
    ) -> RotationResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_time_follows_last_rotation() {
        let now = Utc::now();
        let mut record = RotationRecord {
            principal: "root".into(),
            interval: Some(Duration::from_secs(3600)),
            last_rotation: None,
            policy: None,
        };
        assert_eq!(record.next_due(now), Some(now));

        record.last_rotation = Some(now);
        assert_eq!(record.next_due(now), Some(now + chrono::Duration::hours(1)));

        record.interval = None;
        assert_eq!(record.next_due(now), None);
    }
}
