//! Value generation policies
//!
//! Passwords and usernames come from named [`PasswordPolicy`] rules. An empty
//! or absent policy name falls back to [`PasswordPolicy::default`]: twenty
//! characters drawn from letters, digits and `-`, with at least one of each.

use std::collections::BTreeMap;

use horizon_core::SecretString;
use parking_lot::RwLock;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SHORT_SYMBOLS: &str = "-";

/// Characters a policy must draw from, with a minimum count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharsetRule {
    /// Allowed characters
    pub charset: String,
    /// Minimum number of characters taken from this set
    #[serde(default)]
    pub min_chars: usize,
}

impl CharsetRule {
    /// Rule over `charset` requiring `min_chars` of its characters
    pub fn new(charset: impl Into<String>, min_chars: usize) -> Self {
        Self {
            charset: charset.into(),
            min_chars,
        }
    }
}

/// Length and character-class requirements of a generated value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    /// Number of characters
    pub length: usize,
    /// Character rules; the union of all sets fills the remaining length
    pub rules: Vec<CharsetRule>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: 20,
            rules: vec![
                CharsetRule::new(LOWERCASE, 1),
                CharsetRule::new(UPPERCASE, 1),
                CharsetRule::new(DIGITS, 1),
                CharsetRule::new(SHORT_SYMBOLS, 1),
            ],
        }
    }
}

impl PasswordPolicy {
    /// Check that the policy can produce a value
    pub fn validate(&self, name: &str) -> Result<(), GenerationError> {
        let invalid = |reason: &str| GenerationError::InvalidPolicy {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if self.length == 0 {
            return Err(invalid("length must be greater than zero"));
        }
        if self.rules.is_empty() {
            return Err(invalid("at least one charset rule is required"));
        }
        if self.rules.iter().any(|r| r.charset.is_empty()) {
            return Err(invalid("charset rules cannot be empty"));
        }
        let required: usize = self.rules.iter().map(|r| r.min_chars).sum();
        if required > self.length {
            return Err(invalid(&format!(
                "rules require {required} characters but length is {}",
                self.length
            )));
        }
        Ok(())
    }

    /// Generate a value satisfying every rule
    pub fn generate<R: Rng>(&self, rng: &mut R) -> String {
        let mut pool: Vec<char> = self.rules.iter().flat_map(|r| r.charset.chars()).collect();
        pool.sort_unstable();
        pool.dedup();

        let mut out = Vec::with_capacity(self.length);
        for rule in &self.rules {
            let chars: Vec<char> = rule.charset.chars().collect();
            for _ in 0..rule.min_chars {
                out.push(chars[rng.random_range(0..chars.len())]);
            }
        }
        while out.len() < self.length {
            out.push(pool[rng.random_range(0..pool.len())]);
        }
        out.shuffle(rng);
        out.into_iter().collect()
    }
}

/// Source of generated credential values
pub trait ValueGenerator: Send + Sync {
    /// Generate a value with the named policy, or the default one
    fn generate(&self, policy: Option<&str>) -> Result<SecretString, GenerationError>;
}

/// Registry of named password policies
#[derive(Debug, Default)]
pub struct PolicyGenerator {
    policies: RwLock<BTreeMap<String, PasswordPolicy>>,
}

impl PolicyGenerator {
    /// Empty registry; only the default policy is available
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with `policies`
    pub fn with_policies(
        policies: impl IntoIterator<Item = (String, PasswordPolicy)>,
    ) -> Result<Self, GenerationError> {
        let generator = Self::new();
        for (name, policy) in policies {
            generator.register(name, policy)?;
        }
        Ok(generator)
    }

    /// Add or replace a named policy
    pub fn register(
        &self,
        name: impl Into<String>,
        policy: PasswordPolicy,
    ) -> Result<(), GenerationError> {
        let name = name.into();
        policy.validate(&name)?;
        self.policies.write().insert(name, policy);
        Ok(())
    }

    /// Remove a named policy
    pub fn remove(&self, name: &str) -> Option<PasswordPolicy> {
        self.policies.write().remove(name)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.policies.read().contains_key(name)
    }
}

impl ValueGenerator for PolicyGenerator {
    fn generate(&self, policy: Option<&str>) -> Result<SecretString, GenerationError> {
        let mut rng = rand::rng();
        match policy.filter(|name| !name.is_empty()) {
            None => Ok(SecretString::new(PasswordPolicy::default().generate(&mut rng))),
            Some(name) => {
                let policies = self.policies.read();
                let policy = policies
                    .get(name)
                    .ok_or_else(|| GenerationError::PolicyNotFound(name.to_string()))?;
                Ok(SecretString::new(policy.generate(&mut rng)))
            }
        }
    }
}
