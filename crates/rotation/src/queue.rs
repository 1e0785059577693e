//! Rotation priority queue
//!
//! Binary min-heap keyed by due time, with a key → slot map so that removal
//! and re-prioritisation of an arbitrary key are `O(log n)`. Equal due times
//! pop in insertion order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use horizon_core::CredentialKey;

use crate::error::QueueError;

/// One pending rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem<T> {
    /// Credential the rotation is for
    pub key: CredentialKey,
    /// Due time
    pub priority: DateTime<Utc>,
    /// Caller data carried with the item
    pub payload: T,
}

impl<T> QueueItem<T> {
    /// Create an item
    pub fn new(key: CredentialKey, priority: DateTime<Utc>, payload: T) -> Self {
        Self {
            key,
            priority,
            payload,
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    item: QueueItem<T>,
    seq: u64,
}

impl<T> Slot<T> {
    fn before(&self, other: &Self) -> bool {
        (self.item.priority, self.seq) < (other.item.priority, other.seq)
    }
}

/// Min-heap of rotation items with at most one item per key
///
/// # Example
///
/// ```rust
/// use chrono::{Duration, Utc};
/// use horizon_core::CredentialKey;
/// use horizon_rotation::{QueueItem, RotationQueue};
///
/// let now = Utc::now();
/// let prod = CredentialKey::new("prod").unwrap();
/// let staging = CredentialKey::new("staging").unwrap();
///
/// let mut queue = RotationQueue::new();
/// queue.insert(QueueItem::new(prod.clone(), now + Duration::hours(1), ())).unwrap();
/// queue.insert(QueueItem::new(staging.clone(), now, ())).unwrap();
///
/// // a second item for the same key is refused
/// assert!(queue.insert(QueueItem::new(prod.clone(), now, ())).is_err());
///
/// assert_eq!(queue.pop_due(now).map(|item| item.key), Some(staging));
/// assert!(queue.pop_due(now).is_none());
/// assert_eq!(queue.pop_min().map(|item| item.key), Some(prod));
/// ```
#[derive(Debug)]
pub struct RotationQueue<T> {
    heap: Vec<Slot<T>>,
    index: HashMap<CredentialKey, usize>,
    next_seq: u64,
}

impl<T> Default for RotationQueue<T> {
    fn default() -> Self {
        Self {
            heap: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> RotationQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no item is queued
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether an item for `key` is queued
    pub fn contains(&self, key: &CredentialKey) -> bool {
        self.index.contains_key(key)
    }

    /// Queued item for `key`
    pub fn get(&self, key: &CredentialKey) -> Option<&QueueItem<T>> {
        self.index.get(key).map(|&i| &self.heap[i].item)
    }

    /// Item with the earliest due time
    pub fn peek(&self) -> Option<&QueueItem<T>> {
        self.heap.first().map(|slot| &slot.item)
    }

    /// Items in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &QueueItem<T>> {
        self.heap.iter().map(|slot| &slot.item)
    }

    /// Add an item; fails if the key is already queued
    pub fn insert(&mut self, item: QueueItem<T>) -> Result<(), QueueError> {
        if self.index.contains_key(&item.key) {
            return Err(QueueError::DuplicateKey(item.key));
        }
        let seq = self.bump_seq();
        let pos = self.heap.len();
        self.index.insert(item.key.clone(), pos);
        self.heap.push(Slot { item, seq });
        self.sift_up(pos);
        Ok(())
    }

    /// Remove the item with the earliest due time
    pub fn pop_min(&mut self) -> Option<QueueItem<T>> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.remove_at(0))
    }

    /// Remove the earliest item if it is due at or before `now`
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<QueueItem<T>> {
        match self.peek() {
            Some(item) if item.priority <= now => self.pop_min(),
            _ => None,
        }
    }

    /// Remove the item for `key` wherever it sits
    pub fn pop_by_key(&mut self, key: &CredentialKey) -> Option<QueueItem<T>> {
        let pos = *self.index.get(key)?;
        Some(self.remove_at(pos))
    }

    /// Move the item for `key` to a new due time
    ///
    /// The item is ordered after existing items with the same due time.
    pub fn update_priority(
        &mut self,
        key: &CredentialKey,
        priority: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let Some(&pos) = self.index.get(key) else {
            return Err(QueueError::NotFound(key.clone()));
        };
        let seq = self.bump_seq();
        let slot = &mut self.heap[pos];
        slot.item.priority = priority;
        slot.seq = seq;
        self.restore(pos);
        Ok(())
    }

    /// Insert, or replace the due time and payload of an existing item
    pub fn upsert(&mut self, item: QueueItem<T>) {
        match self.index.get(&item.key) {
            Some(&pos) => {
                let seq = self.bump_seq();
                self.heap[pos] = Slot { item, seq };
                self.restore(pos);
            }
            None => {
                // key absent, insert cannot fail
                let _ = self.insert(item);
            }
        }
    }

    /// Drop every item
    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove_at(&mut self, pos: usize) -> QueueItem<T> {
        let removed = self.heap.swap_remove(pos);
        self.index.remove(&removed.item.key);
        if pos < self.heap.len() {
            self.index.insert(self.heap[pos].item.key.clone(), pos);
            self.restore(pos);
        }
        removed.item
    }

    fn restore(&mut self, pos: usize) {
        let pos = self.sift_up(pos);
        self.sift_down(pos);
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.heap[pos].before(&self.heap[parent]) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.heap[left].before(&self.heap[smallest]) {
                smallest = left;
            }
            if right < len && self.heap[right].before(&self.heap[smallest]) {
                smallest = right;
            }
            if smallest == pos {
                return;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].item.key.clone(), a);
        self.index.insert(self.heap[b].item.key.clone(), b);
    }
}
