//! In-memory identity service for tests
//!
//! [`FakeIdentityService`] keeps local accounts in memory and checks every
//! call against the password the client connected with, so a client built
//! with a stale root password is rejected like it would be by a real
//! instance. Failures and latency can be injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use horizon_core::SecretString;
use parking_lot::Mutex;
use url::Url;

use crate::error::IdentityError;
use crate::identity::{Account, IdentityClient, IdentityConnector, IdentityResult};

/// Identity service operations, for failure injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeCall {
    /// `create_account`
    CreateAccount,
    /// `set_password`
    SetPassword,
    /// `assign_roles`
    AssignRoles,
    /// `get_account`
    GetAccount,
    /// `delete_account`
    DeleteAccount,
}

/// Stored state of one fake account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeAccount {
    /// Current password, `None` until one is set
    pub password: Option<String>,
    /// Contact address
    pub contact: Option<String>,
    /// Granted roles
    pub roles: Vec<String>,
}

#[derive(Default)]
struct State {
    accounts: DashMap<String, FakeAccount>,
    failures: Mutex<HashMap<FakeCall, VecDeque<IdentityError>>>,
    calls: Mutex<Vec<FakeCall>>,
    delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
}

/// In-memory identity service; clones share state
#[derive(Clone, Default)]
pub struct FakeIdentityService {
    state: Arc<State>,
}

impl FakeIdentityService {
    /// Service with no accounts
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account with a password
    pub fn with_account(self, username: &str, password: &str) -> Self {
        self.state.accounts.insert(
            username.to_string(),
            FakeAccount {
                password: Some(password.to_string()),
                ..FakeAccount::default()
            },
        );
        self
    }

    /// Snapshot of an account
    pub fn account(&self, username: &str) -> Option<FakeAccount> {
        self.state.accounts.get(username).map(|a| a.clone())
    }

    /// Current password of an account
    pub fn password_of(&self, username: &str) -> Option<String> {
        self.account(username).and_then(|a| a.password)
    }

    /// Overwrite an account's password out of band
    pub fn set_password(&self, username: &str, password: &str) {
        if let Some(mut account) = self.state.accounts.get_mut(username) {
            account.password = Some(password.to_string());
        }
    }

    /// Number of accounts
    pub fn account_count(&self) -> usize {
        self.state.accounts.len()
    }

    /// Make the next `call` fail with `error`
    pub fn fail_next(&self, call: FakeCall, error: IdentityError) {
        self.state
            .failures
            .lock()
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Delay every call by `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.state.delay.lock() = delay;
    }

    /// How often `call` was attempted
    pub fn count(&self, call: FakeCall) -> usize {
        self.state.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Every attempted call, in order
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.calls.lock().clone()
    }

    /// How many clients were built
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FakeIdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeIdentityService")
            .field("accounts", &self.state.accounts.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityConnector for FakeIdentityService {
    async fn connect(
        &self,
        _endpoint: &Url,
        username: &str,
        password: &SecretString,
    ) -> IdentityResult<Arc<dyn IdentityClient>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            state: Arc::clone(&self.state),
            username: username.to_string(),
            password: password.clone(),
        }))
    }
}

struct FakeClient {
    state: Arc<State>,
    username: String,
    password: SecretString,
}

impl FakeClient {
    /// Record the call, wait out the delay, then authenticate and apply
    /// any injected failure
    async fn enter(&self, call: FakeCall) -> IdentityResult<()> {
        self.state.calls.lock().push(call);
        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let authenticated = self
            .state
            .accounts
            .get(&self.username)
            .and_then(|a| a.password.clone())
            .is_some_and(|stored| self.password.matches(&stored));
        if !authenticated {
            return Err(IdentityError::Unauthorized(self.username.clone()));
        }

        let injected = self
            .state
            .failures
            .lock()
            .get_mut(&call)
            .and_then(VecDeque::pop_front);
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn snapshot(&self, username: &str) -> IdentityResult<Account> {
        let account = self
            .state
            .accounts
            .get(username)
            .ok_or_else(|| IdentityError::NotFound(username.to_string()))?;
        Ok(Account {
            identifier: username.to_string(),
            contact: account.contact.clone(),
            roles: account.roles.clone(),
        })
    }
}

#[async_trait]
impl IdentityClient for FakeClient {
    async fn create_account(
        &self,
        username: &str,
        contact: Option<&str>,
    ) -> IdentityResult<Account> {
        self.enter(FakeCall::CreateAccount).await?;
        if self.state.accounts.contains_key(username) {
            return Err(IdentityError::Remote {
                status: 409,
                message: format!("account '{username}' already exists"),
            });
        }
        self.state.accounts.insert(
            username.to_string(),
            FakeAccount {
                password: None,
                contact: contact.map(str::to_string),
                roles: Vec::new(),
            },
        );
        self.snapshot(username)
    }

    async fn set_password(&self, account: &Account, value: &SecretString) -> IdentityResult<()> {
        self.enter(FakeCall::SetPassword).await?;
        let mut stored = self
            .state
            .accounts
            .get_mut(&account.identifier)
            .ok_or_else(|| IdentityError::NotFound(account.identifier.clone()))?;
        stored.password = Some(value.expose_secret(str::to_string));
        Ok(())
    }

    async fn assign_roles(
        &self,
        account: &Account,
        contact: Option<&str>,
        roles: &[String],
    ) -> IdentityResult<()> {
        self.enter(FakeCall::AssignRoles).await?;
        let mut stored = self
            .state
            .accounts
            .get_mut(&account.identifier)
            .ok_or_else(|| IdentityError::NotFound(account.identifier.clone()))?;
        if let Some(contact) = contact {
            stored.contact = Some(contact.to_string());
        }
        stored.roles = roles.to_vec();
        Ok(())
    }

    async fn get_account(&self, username: &str) -> IdentityResult<Account> {
        self.enter(FakeCall::GetAccount).await?;
        self.snapshot(username)
    }

    async fn delete_account(&self, account: &Account) -> IdentityResult<()> {
        self.enter(FakeCall::DeleteAccount).await?;
        self.state
            .accounts
            .remove(&account.identifier)
            .map(|_| ())
            .ok_or_else(|| IdentityError::NotFound(account.identifier.clone()))
    }
}
