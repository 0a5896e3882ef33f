use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::DuplicatePolicy;
use crate::error::{QueueError, Result};
use crate::metrics::{PollMetrics, RegistryMetrics};

/// Ordered set of channel names the engine polls.
///
/// The list is immutable once published: writers build a new list and
/// swap it in, so a poll cycle iterates its snapshot without holding the lock.
pub struct ChannelRegistry {
    channels: RwLock<Arc<Vec<String>>>,
    duplicates: DuplicatePolicy,
}

impl ChannelRegistry {
    pub fn new(duplicates: DuplicatePolicy) -> Self {
        Self {
            channels: RwLock::new(Arc::new(Vec::new())),
            duplicates,
        }
    }

    /// Append a channel to the polling order.
    ///
    /// Returns `Ok(false)` when the name was already present and the policy
    /// is `Ignore`.
    pub async fn add(&self, name: &str) -> Result<bool> {
        let mut guard = self.channels.write().await;

        if guard.iter().any(|c| c == name) {
            return match self.duplicates {
                DuplicatePolicy::Reject => Err(QueueError::ChannelExists(name.to_string())),
                DuplicatePolicy::Ignore => Ok(false),
            };
        }

        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(name.to_string());
        *guard = Arc::new(next);

        RegistryMetrics::channel_added();
        Ok(true)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let mut guard = self.channels.write().await;

        if !guard.iter().any(|c| c == name) {
            return Err(QueueError::ChannelNotFound(name.to_string()));
        }

        let next: Vec<String> = guard.iter().filter(|c| *c != name).cloned().collect();
        *guard = Arc::new(next);

        RegistryMetrics::channel_removed();
        PollMetrics::forget_channel(name);
        Ok(())
    }

    /// Current polling order.
    pub async fn snapshot(&self) -> Arc<Vec<String>> {
        self.channels.read().await.clone()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.channels.read().await.iter().any(|c| c == name)
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insertion_order_is_polling_order() {
        let registry = ChannelRegistry::new(DuplicatePolicy::Reject);
        registry.add("b").await.unwrap();
        registry.add("a").await.unwrap();
        registry.add("c").await.unwrap();

        assert_eq!(*registry.snapshot().await, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let registry = ChannelRegistry::new(DuplicatePolicy::Reject);
        registry.add("orders").await.unwrap();

        let result = registry.add("orders").await;
        assert!(matches!(result, Err(QueueError::ChannelExists(_))));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_ignored() {
        let registry = ChannelRegistry::new(DuplicatePolicy::Ignore);
        assert!(registry.add("orders").await.unwrap());
        assert!(!registry.add("orders").await.unwrap());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = ChannelRegistry::new(DuplicatePolicy::Reject);
        registry.add("a").await.unwrap();
        registry.add("b").await.unwrap();

        registry.remove("a").await.unwrap();
        assert_eq!(*registry.snapshot().await, vec!["b"]);
        assert!(!registry.contains("a").await);

        let result = registry.remove("a").await;
        assert!(matches!(result, Err(QueueError::ChannelNotFound(_))));
    }

    #[tokio::test]
    async fn test_snapshot_unaffected_by_later_changes() {
        let registry = ChannelRegistry::new(DuplicatePolicy::Reject);
        registry.add("a").await.unwrap();

        let snapshot = registry.snapshot().await;
        registry.add("b").await.unwrap();
        registry.remove("a").await.unwrap();

        assert_eq!(*snapshot, vec!["a"]);
        assert!(!registry.is_empty().await);
    }
}
