//! Write-ahead log of rotation intents
//!
//! An intent is written before the identity service is asked to change a
//! credential and deleted once the new value is durably recorded. Anything
//! found here at startup is an interrupted rotation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_core::{CredentialKey, SecretString, Storage, StorageError, StorageExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RotationError, RotationResult};
use crate::quarantine::{self, QuarantinedIntent};

/// Kind of the intents written by the rotation executor
pub const STATIC_ROTATION_KIND: &str = "static-rotation";

const WAL_PREFIX: &str = "wal/";
const QUARANTINE_PREFIX: &str = "wal-quarantine/";

/// Opaque handle of a WAL entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalId(Uuid);

impl WalId {
    /// Generate a new id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Typed, timestamped WAL record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Entry id
    pub id: WalId,
    /// Entry kind, e.g. [`STATIC_ROTATION_KIND`]
    pub kind: String,
    /// Credential the entry belongs to
    pub key: Option<CredentialKey>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Kind-specific payload
    pub data: serde_json::Value,
}

impl WalEntry {
    /// Create an entry with a fresh id
    pub fn new(kind: impl Into<String>, key: Option<CredentialKey>, data: serde_json::Value) -> Self {
        Self {
            id: WalId::new(),
            kind: kind.into(),
            key,
            created_at: Utc::now(),
            data,
        }
    }
}

/// A rotation that was started but not confirmed committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationIntent {
    /// WAL entry id
    pub id: WalId,
    /// Credential being rotated
    pub key: CredentialKey,
    /// Value sent (or about to be sent) to the identity service
    pub new_secret: SecretString,
    /// Principal whose credential changes
    pub principal_username: String,
    /// When the intent was written
    pub created_at: DateTime<Utc>,
    /// Last rotation the durable record knew about when the intent was written
    pub last_confirmed_rotation: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct IntentData {
    new_secret: SecretString,
    principal_username: String,
    last_confirmed_rotation: Option<DateTime<Utc>>,
}

impl RotationIntent {
    /// Create an intent with a fresh id
    pub fn new(
        key: CredentialKey,
        principal_username: impl Into<String>,
        new_secret: SecretString,
        last_confirmed_rotation: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: WalId::new(),
            key,
            new_secret,
            principal_username: principal_username.into(),
            created_at: Utc::now(),
            last_confirmed_rotation,
        }
    }

    /// Whether a rotation committed after this intent was written
    ///
    /// Such an intent is stale: the durable record already moved past it.
    pub fn is_superseded_by(&self, last_rotation: Option<DateTime<Utc>>) -> bool {
        match (last_rotation, self.last_confirmed_rotation) {
            (Some(recorded), Some(seen)) => recorded > seen,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Encode as a WAL entry
    pub fn to_entry(&self) -> RotationResult<WalEntry> {
        let data = serde_json::to_value(IntentData {
            new_secret: self.new_secret.clone(),
            principal_username: self.principal_username.clone(),
            last_confirmed_rotation: self.last_confirmed_rotation,
        })
        .map_err(|e| RotationError::WalCorrupt {
            id: self.id,
            reason: e.to_string(),
        })?;

        Ok(WalEntry {
            id: self.id,
            kind: STATIC_ROTATION_KIND.to_string(),
            key: Some(self.key.clone()),
            created_at: self.created_at,
            data,
        })
    }

    /// Decode a WAL entry of kind [`STATIC_ROTATION_KIND`]
    pub fn from_entry(entry: WalEntry) -> RotationResult<Self> {
        let corrupt = |reason: String| RotationError::WalCorrupt {
            id: entry.id,
            reason,
        };

        if entry.kind != STATIC_ROTATION_KIND {
            return Err(corrupt(format!("unexpected kind '{}'", entry.kind)));
        }
        let key = entry
            .key
            .clone()
            .ok_or_else(|| corrupt("intent has no credential key".to_string()))?;
        let data: IntentData =
            serde_json::from_value(entry.data.clone()).map_err(|e| corrupt(e.to_string()))?;

        Ok(Self {
            id: entry.id,
            key,
            new_secret: data.new_secret,
            principal_username: data.principal_username,
            created_at: entry.created_at,
            last_confirmed_rotation: data.last_confirmed_rotation,
        })
    }
}

/// Durable store of WAL entries
#[async_trait]
pub trait WalStore: Send + Sync {
    /// Persist an entry; once this returns the entry survives a restart
    async fn write(&self, entry: &WalEntry) -> RotationResult<WalId>;

    /// Read an entry; `WalCorrupt` if it exists but cannot be decoded
    async fn read(&self, id: WalId) -> RotationResult<Option<WalEntry>>;

    /// Delete an entry; deleting an absent entry succeeds
    async fn delete(&self, id: WalId) -> RotationResult<()>;

    /// Ids of all live entries
    async fn list_ids(&self) -> RotationResult<Vec<WalId>>;

    /// Move an entry out of the live log, keeping its raw bytes
    async fn quarantine(&self, id: WalId, reason: &str) -> RotationResult<QuarantinedIntent>;

    /// All quarantined entries
    async fn list_quarantined(&self) -> RotationResult<Vec<QuarantinedIntent>>;

    /// Drop a quarantined entry
    async fn release(&self, id: WalId) -> RotationResult<Option<QuarantinedIntent>>;

    /// Key named by an entry that no longer decodes, if it can be read
    async fn owner(&self, _id: WalId) -> RotationResult<Option<CredentialKey>> {
        Ok(None)
    }

    /// Decodable live entries of `kind`; corrupt entries are skipped
    async fn list_by_kind(&self, kind: &str) -> RotationResult<Vec<WalEntry>> {
        let mut entries = Vec::new();
        for id in self.list_ids().await? {
            match self.read(id).await {
                Ok(Some(entry)) if entry.kind == kind => entries.push(entry),
                Ok(_) => {}
                Err(RotationError::WalCorrupt { id, reason }) => {
                    tracing::warn!(wal_id = %id, %reason, "skipping corrupt WAL entry");
                }
                Err(e) => return Err(e),
            }
        }
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }
}

/// Live WAL entries of one key
#[derive(Debug, Default)]
pub struct KeyIntents {
    /// Decodable intents, oldest first
    pub intents: Vec<RotationIntent>,
    /// Entries of the key that cannot be decoded, with the reason
    pub corrupt: Vec<(WalId, String)>,
}

/// Scan the WAL for entries of `key`
///
/// Entries too damaged to name their key are left to the startup pass.
pub async fn scan_intents(wal: &dyn WalStore, key: &CredentialKey) -> RotationResult<KeyIntents> {
    let mut found = KeyIntents::default();
    for id in wal.list_ids().await? {
        let entry = match wal.read(id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(RotationError::WalCorrupt { reason, .. }) => {
                if wal.owner(id).await?.as_ref() == Some(key) {
                    found.corrupt.push((id, reason));
                }
                continue;
            }
            Err(e) => return Err(e),
        };
        if entry.kind != STATIC_ROTATION_KIND || entry.key.as_ref() != Some(key) {
            continue;
        }
        match RotationIntent::from_entry(entry) {
            Ok(intent) => found.intents.push(intent),
            Err(RotationError::WalCorrupt { reason, .. }) => found.corrupt.push((id, reason)),
            Err(e) => return Err(e),
        }
    }
    found.intents.sort_by_key(|intent| intent.created_at);
    Ok(found)
}

/// Pending rotation intents for `key`, oldest first
pub async fn intents_for(
    wal: &dyn WalStore,
    key: &CredentialKey,
) -> RotationResult<Vec<RotationIntent>> {
    Ok(scan_intents(wal, key).await?.intents)
}

/// Delete every live entry of `key`, undecodable ones included
pub async fn discard_intents(wal: &dyn WalStore, key: &CredentialKey) -> RotationResult<usize> {
    let found = scan_intents(wal, key).await?;
    let ids: Vec<WalId> = found
        .intents
        .iter()
        .map(|intent| intent.id)
        .chain(found.corrupt.iter().map(|(id, _)| *id))
        .collect();
    for id in &ids {
        wal.delete(*id).await?;
    }
    Ok(ids.len())
}

/// [`WalStore`] on top of durable keyed storage
///
/// Entries live at `wal/<id>` as JSON; quarantined ones at
/// `wal-quarantine/<id>`.
#[derive(Clone)]
pub struct StorageWal {
    storage: Arc<dyn Storage>,
}

impl StorageWal {
    /// Create a WAL over `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn entry_path(id: WalId) -> String {
        format!("{WAL_PREFIX}{id}")
    }

    fn quarantine_path(id: WalId) -> String {
        format!("{QUARANTINE_PREFIX}{id}")
    }

    async fn ids_under(&self, prefix: &str) -> RotationResult<Vec<WalId>> {
        let mut ids = Vec::new();
        for name in self.storage.list(prefix).await? {
            match name.parse::<WalId>() {
                Ok(id) => ids.push(id),
                Err(_) => tracing::debug!(prefix, name, "ignoring foreign entry in WAL"),
            }
        }
        Ok(ids)
    }
}

impl fmt::Debug for StorageWal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageWal").finish_non_exhaustive()
    }
}

#[async_trait]
impl WalStore for StorageWal {
    async fn write(&self, entry: &WalEntry) -> RotationResult<WalId> {
        self.storage
            .put_json(&Self::entry_path(entry.id), entry)
            .await?;
        tracing::debug!(wal_id = %entry.id, kind = %entry.kind, "WAL entry written");
        Ok(entry.id)
    }

    async fn read(&self, id: WalId) -> RotationResult<Option<WalEntry>> {
        match self.storage.get_json::<WalEntry>(&Self::entry_path(id)).await {
            Ok(entry) => Ok(entry),
            Err(StorageError::Serialization { source, .. }) => Err(RotationError::WalCorrupt {
                id,
                reason: source.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: WalId) -> RotationResult<()> {
        self.storage.delete(&Self::entry_path(id)).await?;
        Ok(())
    }

    async fn list_ids(&self) -> RotationResult<Vec<WalId>> {
        self.ids_under(WAL_PREFIX).await
    }

    async fn quarantine(&self, id: WalId, reason: &str) -> RotationResult<QuarantinedIntent> {
        let raw = self
            .storage
            .get(&Self::entry_path(id))
            .await?
            .unwrap_or_default();
        let record = QuarantinedIntent::from_raw(id, reason, &raw);

        self.storage
            .put_json(&Self::quarantine_path(id), &record)
            .await?;
        self.storage.delete(&Self::entry_path(id)).await?;
        Ok(record)
    }

    async fn list_quarantined(&self) -> RotationResult<Vec<QuarantinedIntent>> {
        let mut records = Vec::new();
        for id in self.ids_under(QUARANTINE_PREFIX).await? {
            match self
                .storage
                .get_json::<QuarantinedIntent>(&Self::quarantine_path(id))
                .await
            {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::error!(wal_id = %id, error = %e, "unreadable quarantine record"),
            }
        }
        Ok(records)
    }

    async fn owner(&self, id: WalId) -> RotationResult<Option<CredentialKey>> {
        let raw = self.storage.get(&Self::entry_path(id)).await?;
        Ok(raw.as_deref().and_then(quarantine::key_in_raw))
    }

    async fn release(&self, id: WalId) -> RotationResult<Option<QuarantinedIntent>> {
        let path = Self::quarantine_path(id);
        let record = self.storage.get_json::<QuarantinedIntent>(&path).await?;
        self.storage.delete(&path).await?;
        Ok(record)
    }
}
