use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Backend, Capabilities};
use crate::{clock::Timestamp, entry::Entry, Result};

/// Volatile backend over a concurrent hash map.
#[derive(Debug)]
pub struct MemoryBackend {
    data: DashMap<String, Entry>,
    capabilities: Capabilities,
}

impl MemoryBackend {
    pub const DEFAULT_CAPABILITIES: Capabilities =
        Capabilities::new(Duration::from_millis(1), true);

    pub fn new() -> Self {
        Self::with_capabilities(Self::DEFAULT_CAPABILITIES)
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            data: DashMap::new(),
            capabilities,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn load(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn store(&self, key: String, entry: Entry) -> Result<()> {
        self.data.insert(key, entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn remove_if_expired(&self, key: &str, now: Timestamp) -> Result<bool> {
        Ok(self
            .data
            .remove_if(key, |_, entry| entry.is_expired_at(now))
            .is_some())
    }

    async fn update_expiry(
        &self,
        key: &str,
        now: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Result<bool> {
        match self.data.get_mut(key) {
            Some(mut entry) if !entry.is_expired_at(now) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn evict_expired(&self, now: Timestamp) -> Result<usize> {
        let mut evicted = 0;
        self.data.retain(|_, entry| {
            let keep = !entry.is_expired_at(now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn expiring(ms: u64) -> Entry {
        Entry::new(b"value".to_vec(), at(0), Some(Duration::from_millis(ms)))
    }

    #[tokio::test]
    async fn store_load_remove() -> Result<()> {
        let backend = MemoryBackend::new();

        backend.store("key1".into(), expiring(100)).await?;
        assert_eq!(backend.load("key1").await?, Some(expiring(100)));
        assert!(backend.remove("key1").await?);
        assert!(!backend.remove("key1").await?);
        assert_eq!(backend.load("key1").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn remove_if_expired_spares_live_entries() -> Result<()> {
        let backend = MemoryBackend::new();
        backend.store("key1".into(), expiring(100)).await?;

        assert!(!backend.remove_if_expired("key1", at(99)).await?);
        assert!(backend.load("key1").await?.is_some());
        assert!(backend.remove_if_expired("key1", at(100)).await?);
        assert!(backend.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn update_expiry_only_touches_live_entries() -> Result<()> {
        let backend = MemoryBackend::new();
        backend.store("key1".into(), expiring(100)).await?;

        assert!(backend.update_expiry("key1", at(50), Some(at(500))).await?);
        let entry = backend.load("key1").await?.expect("entry present");
        assert_eq!(entry.expires_at, Some(at(500)));
        assert_eq!(entry.value, b"value".to_vec());

        assert!(!backend.update_expiry("key1", at(500), None).await?);
        assert!(!backend.update_expiry("missing", at(0), None).await?);

        Ok(())
    }

    #[tokio::test]
    async fn evict_expired_counts_removals() -> Result<()> {
        let backend = MemoryBackend::new();

        for i in 0..5 {
            backend.store(format!("expire_key{}", i), expiring(100)).await?;
        }
        for i in 0..5 {
            backend
                .store(format!("perm_key{}", i), Entry::new(vec![], at(0), None))
                .await?;
        }

        assert_eq!(backend.evict_expired(at(100)).await?, 5);
        assert_eq!(backend.len(), 5);

        Ok(())
    }
}
