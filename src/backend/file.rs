use std::{
    fs,
    path::Path,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{sync::Mutex, task::JoinHandle, time};
use tracing::{debug, error, info};

use super::{Backend, Capabilities};
use crate::{
    clock::{Clock, Timestamp},
    entry::Entry,
    persistence::{aof::AofManager, snapshot::SnapshotManager, Operation},
    Result,
};

const AOF_FILE: &str = "appendonly.aof";
const SNAPSHOT_FILE: &str = "dump.json";

/// Durable backend: an in-memory working set backed by an operation log and
/// periodic snapshots in a data directory.
///
/// Every mutation is appended to the log before it is applied in memory, and
/// both happen under `write_lock`, so log order matches apply order.
pub struct FileBackend {
    data: DashMap<String, Entry>,
    aof: AofManager,
    snapshot: SnapshotManager,
    write_lock: Mutex<()>,
    capabilities: Capabilities,
}

impl FileBackend {
    pub const DEFAULT_CAPABILITIES: Capabilities =
        Capabilities::new(Duration::from_secs(1), true);

    pub fn open(dir: impl AsRef<Path>, clock: &dyn Clock) -> Result<Self> {
        Self::open_with_capabilities(dir, Self::DEFAULT_CAPABILITIES, clock)
    }

    /// Opens `dir`, creating it if needed, and replays snapshot then log.
    /// Entries already expired by `clock` are not loaded.
    pub fn open_with_capabilities(
        dir: impl AsRef<Path>,
        capabilities: Capabilities,
        clock: &dyn Clock,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        info!("Opening file backend in {:?}", dir);

        let backend = Self {
            data: DashMap::new(),
            aof: AofManager::new(dir.join(AOF_FILE))?,
            snapshot: SnapshotManager::new(dir.join(SNAPSHOT_FILE)),
            write_lock: Mutex::new(()),
            capabilities,
        };

        backend.load_persistent_data(clock.now())?;
        Ok(backend)
    }

    fn load_persistent_data(&self, now: Timestamp) -> Result<()> {
        for (key, entry) in self.snapshot.load()? {
            self.data.insert(key, entry);
        }

        let operations = self.aof.load_operations()?;
        let replayed = operations.len();
        for op in operations {
            match op {
                Operation::Set { key, entry } => {
                    self.data.insert(key, entry);
                }
                Operation::Delete { key } => {
                    self.data.remove(&key);
                }
                Operation::Expire { key, expires_at } => {
                    if let Some(mut entry) = self.data.get_mut(&key) {
                        entry.expires_at = expires_at;
                    }
                }
            }
        }

        self.data.retain(|_, entry| !entry.is_expired_at(now));

        info!(
            "Loaded {} live entries ({} log records replayed)",
            self.data.len(),
            replayed
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flushes and fsyncs the operation log.
    pub async fn sync(&self) -> Result<()> {
        self.aof.sync().await
    }

    /// Snapshots the working set and truncates the log it supersedes.
    pub async fn checkpoint(&self, now: Timestamp) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let entries: Vec<_> = self
            .data
            .iter()
            .filter(|entry| !entry.value().is_expired_at(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let count = entries.len();

        self.snapshot.save(now, entries)?;
        self.aof.truncate().await?;

        info!("Checkpointed {} entries to {:?}", count, self.snapshot.path());
        Ok(())
    }

    /// Spawns the log-sync and checkpoint loop. The task ends on its own once
    /// the backend is dropped.
    pub fn spawn_maintenance(
        self: &Arc<Self>,
        clock: Arc<dyn Clock>,
        sync_every: Duration,
        checkpoint_every: Option<Duration>,
    ) -> JoinHandle<()> {
        let backend: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut sync_interval = time::interval(sync_every);
            let mut checkpoint_interval = checkpoint_every.map(|every| {
                let mut interval = time::interval_at(time::Instant::now() + every, every);
                interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                interval
            });

            loop {
                let checkpoint_due = tokio::select! {
                    _ = sync_interval.tick() => false,
                    _ = async {
                        match checkpoint_interval.as_mut() {
                            Some(interval) => { interval.tick().await; }
                            None => std::future::pending::<()>().await,
                        }
                    } => true,
                };

                let Some(backend) = backend.upgrade() else {
                    debug!("File backend dropped, stopping maintenance");
                    break;
                };

                if checkpoint_due {
                    if let Err(e) = backend.checkpoint(clock.now()).await {
                        error!("Failed to checkpoint: {}", e);
                    }
                } else if let Err(e) = backend.sync().await {
                    error!("Failed to sync AOF: {}", e);
                }
            }
        })
    }
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn load(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn store(&self, key: String, entry: Entry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let op = Operation::Set {
            key: key.clone(),
            entry: entry.clone(),
        };
        self.aof.append_operation(&op).await?;
        self.data.insert(key, entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        if !self.data.contains_key(key) {
            return Ok(false);
        }
        self.aof
            .append_operation(&Operation::Delete { key: key.to_string() })
            .await?;
        Ok(self.data.remove(key).is_some())
    }

    async fn remove_if_expired(&self, key: &str, now: Timestamp) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let expired = self
            .data
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(now));
        if !expired {
            return Ok(false);
        }
        self.aof
            .append_operation(&Operation::Delete { key: key.to_string() })
            .await?;
        Ok(self.data.remove(key).is_some())
    }

    async fn update_expiry(
        &self,
        key: &str,
        now: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let live = self
            .data
            .get(key)
            .is_some_and(|entry| !entry.is_expired_at(now));
        if !live {
            return Ok(false);
        }
        self.aof
            .append_operation(&Operation::Expire {
                key: key.to_string(),
                expires_at,
            })
            .await?;
        if let Some(mut entry) = self.data.get_mut(key) {
            entry.expires_at = expires_at;
        }
        Ok(true)
    }

    async fn evict_expired(&self, now: Timestamp) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let expired: Vec<String> = self
            .data
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        for key in &expired {
            self.aof
                .append_operation(&Operation::Delete { key: key.clone() })
                .await?;
            self.data.remove(key);
        }
        Ok(expired.len())
    }
}
