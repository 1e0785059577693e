//! Shared fixtures for the rotation integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use horizon_core::{CredentialKey, SecretString, Storage, StorageError, StorageExt};
use horizon_rotation::{
    CredentialRotator, RotationConfig, RotationError, RotationIntent, RotationRecord,
    RotationResult,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub fn key(s: &str) -> CredentialKey {
    CredentialKey::new(s).unwrap()
}

/// Config with short timings for tests
pub fn fast_config() -> RotationConfig {
    horizon_log::init_test();
    RotationConfig {
        tick_interval: Duration::from_millis(25),
        retry_backoff: Duration::from_secs(10),
        max_retry_backoff: Duration::from_secs(60),
        lock_timeout: Duration::from_secs(5),
        remote_timeout: Duration::from_secs(5),
        lock_table_size: 16,
        ..RotationConfig::default()
    }
}

/// Simulated identity service; outlives rotator restarts
#[derive(Default)]
pub struct Remote {
    values: Mutex<HashMap<String, String>>,
    pub fail_applies: AtomicU32,
    pub apply_delay: Mutex<Option<Duration>>,
    pub applies: AtomicUsize,
    in_flight: AtomicUsize,
    pub overlapped: AtomicBool,
}

impl Remote {
    pub fn value_of(&self, principal: &str) -> Option<String> {
        self.values.lock().get(principal).cloned()
    }

    pub fn set_value(&self, principal: &str, value: &str) {
        self.values
            .lock()
            .insert(principal.to_string(), value.to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    principal: String,
    interval_secs: Option<u64>,
    last_rotation: Option<DateTime<Utc>>,
    secret: String,
}

impl StoredRecord {
    fn to_record(&self) -> RotationRecord {
        RotationRecord {
            principal: self.principal.clone(),
            interval: self.interval_secs.map(Duration::from_secs),
            last_rotation: self.last_rotation,
            policy: None,
        }
    }
}

/// Rotator keeping its records as JSON under `records/` in a [`Storage`]
pub struct TestRotator {
    storage: Arc<dyn Storage>,
    pub remote: Arc<Remote>,
    pub generated: AtomicUsize,
    pub next_values: Mutex<VecDeque<String>>,
    pub fail_generate: AtomicBool,
    pub fail_commits: AtomicU32,
    pub panic_on: Mutex<Option<CredentialKey>>,
}

impl TestRotator {
    pub fn new(storage: Arc<dyn Storage>, remote: Arc<Remote>) -> Self {
        Self {
            storage,
            remote,
            generated: AtomicUsize::new(0),
            next_values: Mutex::new(VecDeque::new()),
            fail_generate: AtomicBool::new(false),
            fail_commits: AtomicU32::new(0),
            panic_on: Mutex::new(None),
        }
    }

    fn path(key: &CredentialKey) -> String {
        format!("records/{key}")
    }

    pub async fn seed(
        &self,
        key: &CredentialKey,
        interval: Option<Duration>,
        last_rotation: Option<DateTime<Utc>>,
        secret: &str,
    ) {
        let record = StoredRecord {
            principal: format!("{key}-root"),
            interval_secs: interval.map(|i| i.as_secs()),
            last_rotation,
            secret: secret.to_string(),
        };
        self.storage.put_json(&Self::path(key), &record).await.unwrap();
        self.remote.set_value(&record.principal, secret);
    }

    pub async fn remove(&self, key: &CredentialKey) {
        self.storage.delete(&Self::path(key)).await.unwrap();
    }

    pub async fn secret_of(&self, key: &CredentialKey) -> String {
        self.stored(key).await.unwrap().secret
    }

    pub async fn last_rotation_of(&self, key: &CredentialKey) -> Option<DateTime<Utc>> {
        self.stored(key).await.unwrap().last_rotation
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    async fn stored(&self, key: &CredentialKey) -> Option<StoredRecord> {
        self.storage.get_json(&Self::path(key)).await.unwrap()
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl CredentialRotator for TestRotator {
    async fn list_records(&self) -> RotationResult<Vec<(CredentialKey, RotationRecord)>> {
        let mut out = Vec::new();
        for name in self.storage.list("records/").await? {
            let key = key(&name);
            if let Some(stored) = self.stored(&key).await {
                out.push((key, stored.to_record()));
            }
        }
        Ok(out)
    }

    async fn load(&self, key: &CredentialKey) -> RotationResult<Option<RotationRecord>> {
        Ok(self.stored(key).await.map(|s| s.to_record()))
    }

    async fn generate(
        &self,
        _key: &CredentialKey,
        _record: &RotationRecord,
    ) -> RotationResult<SecretString> {
        if self.fail_generate.load(Ordering::SeqCst) {
            return Err(RotationError::Generation("policy 'strict' not found".into()));
        }
        let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
        let value = self
            .next_values
            .lock()
            .pop_front()
            .unwrap_or_else(|| format!("secret-{n}"));
        Ok(SecretString::new(value))
    }

    async fn apply(&self, record: &RotationRecord, intent: &RotationIntent) -> RotationResult<()> {
        if self.panic_on.lock().as_ref() == Some(&intent.key) {
            panic!("identity client blew up");
        }

        let remote = &self.remote;
        if remote.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            remote.overlapped.store(true, Ordering::SeqCst);
        }
        let delay = *remote.apply_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = if take_one(&remote.fail_applies) {
            Err(RotationError::RemoteUnavailable("injected outage".into()))
        } else {
            let value = intent.new_secret.expose_secret(str::to_string);
            remote.set_value(&record.principal, &value);
            remote.applies.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        remote.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn commit(
        &self,
        _record: &RotationRecord,
        intent: &RotationIntent,
        rotated_at: DateTime<Utc>,
    ) -> RotationResult<()> {
        if take_one(&self.fail_commits) {
            return Err(StorageError::Backend("injected write failure".into()).into());
        }
        let mut stored = self
            .stored(&intent.key)
            .await
            .ok_or_else(|| RotationError::Config(format!("'{}' vanished", intent.key)))?;
        stored.secret = intent.new_secret.expose_secret(str::to_string);
        stored.last_rotation = Some(rotated_at);
        self.storage
            .put_json(&Self::path(&intent.key), &stored)
            .await?;
        Ok(())
    }
}
