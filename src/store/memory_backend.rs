//! In-memory list store using DashMap.
//!
//! Same semantics as the Redis backend for a single process: lists are
//! pushed at the head and popped from the tail. Used by tests and by the
//! binary when `backend = "memory"`. It can also simulate failures.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{MessageStore, StoreError};

pub struct MemoryStore {
    lists: DashMap<String, VecDeque<Vec<u8>>>,
    sets: DashMap<String, HashSet<String>>,
    /// channel -> simulated failure reason
    failing: DashMap<String, String>,
    reachable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            lists: DashMap::new(),
            sets: DashMap::new(),
            failing: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }

    /// Make every operation fail as if the store were down.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Make every push/pop on `channel` fail until cleared.
    pub fn fail_channel(&self, channel: &str, reason: &str) {
        self.failing.insert(channel.to_string(), reason.to_string());
    }

    pub fn clear_failure(&self, channel: &str) {
        self.failing.remove(channel);
    }

    /// Number of pending elements in a list.
    pub fn len(&self, list: &str) -> usize {
        self.lists.get(list).map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_member(&self, set: &str, member: &str) -> bool {
        self.sets
            .get(set)
            .map(|s| s.contains(member))
            .unwrap_or(false)
    }

    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unreachable".to_string()))
        }
    }

    fn check_channel(&self, channel: &str) -> Result<(), StoreError> {
        self.check_reachable()?;
        match self.failing.get(channel) {
            Some(reason) => Err(StoreError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_reachable()
    }

    async fn push(&self, channel: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.check_channel(channel)?;
        self.lists
            .entry(channel.to_string())
            .or_default()
            .push_front(payload.to_vec());
        Ok(())
    }

    async fn pop_and_requeue(
        &self,
        channel: &str,
        destination: Option<&str>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_channel(channel)?;

        // Release the source shard before touching the destination list
        let popped = match self.lists.get_mut(channel) {
            Some(mut list) => list.pop_back(),
            None => None,
        };

        if let (Some(payload), Some(destination)) = (&popped, destination) {
            self.lists
                .entry(destination.to_string())
                .or_default()
                .push_front(payload.clone());
        }

        Ok(popped)
    }

    async fn add_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.check_reachable()?;
        self.sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_member(&self, set: &str, member: &str) -> Result<(), StoreError> {
        self.check_reachable()?;
        let now_empty = match self.sets.get_mut(set) {
            Some(mut members) => {
                members.remove(member);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.sets.remove(set);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pop_returns_in_push_order() {
        let store = MemoryStore::new();
        store.push("orders", b"first").await.unwrap();
        store.push("orders", b"second").await.unwrap();

        let first = store.pop_and_requeue("orders", None).await.unwrap();
        let second = store.pop_and_requeue("orders", None).await.unwrap();
        assert_eq!(first.as_deref(), Some(&b"first"[..]));
        assert_eq!(second.as_deref(), Some(&b"second"[..]));
    }

    #[tokio::test]
    async fn test_pop_empty_is_none() {
        let store = MemoryStore::new();
        assert!(store.pop_and_requeue("missing", None).await.unwrap().is_none());

        store.push("orders", b"x").await.unwrap();
        store.pop_and_requeue("orders", None).await.unwrap();
        assert!(store.pop_and_requeue("orders", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pop_with_destination_requeues() {
        let store = MemoryStore::new();
        store.push("orders", b"p1").await.unwrap();

        let popped = store
            .pop_and_requeue("orders", Some("orders:processing"))
            .await
            .unwrap();
        assert_eq!(popped.as_deref(), Some(&b"p1"[..]));
        assert_eq!(store.len("orders"), 0);
        assert_eq!(store.len("orders:processing"), 1);
    }

    #[tokio::test]
    async fn test_failing_channel_is_isolated() {
        let store = MemoryStore::new();
        store.push("good", b"ok").await.unwrap();
        store.fail_channel("bad", "connection reset");

        assert!(store.pop_and_requeue("bad", None).await.is_err());
        assert!(store.pop_and_requeue("good", None).await.unwrap().is_some());

        store.clear_failure("bad");
        assert!(store.pop_and_requeue("bad", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let store = MemoryStore::new();
        store.set_reachable(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.push("orders", b"x").await.is_err());
        assert!(store.add_member("c1", "c1").await.is_err());

        store.set_reachable(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_membership() {
        let store = MemoryStore::new();
        store.add_member("c1", "c1").await.unwrap();
        assert!(store.is_member("c1", "c1"));

        store.remove_member("c1", "c1").await.unwrap();
        assert!(!store.is_member("c1", "c1"));

        // Removing an absent member is not an error, same as SREM
        store.remove_member("c1", "c1").await.unwrap();
    }
}
