//! In-process user store, optionally mirrored to a JSON snapshot file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::id::UserId;
use crate::store::{IdentityKey, Stats, StatsDelta, StoreError, UserRecord, UserStore};

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, UserRecord>,
    by_provider: BTreeMap<String, UserId>,
}

impl Inner {
    fn insert(&mut self, record: UserRecord) {
        if let Some(old) = self.users.get(&record.id) {
            if let Some(ref provider) = old.provider_id {
                self.by_provider.remove(provider);
            }
        }
        if let Some(ref provider) = record.provider_id {
            self.by_provider.insert(provider.clone(), record.id);
        }
        self.users.insert(record.id, record);
    }

    /// Every record, with `replacement` standing in for its id.
    fn snapshot_with<'a>(&'a self, replacement: &'a UserRecord) -> Vec<&'a UserRecord> {
        self.users
            .values()
            .filter(|r| r.id != replacement.id)
            .chain(std::iter::once(replacement))
            .collect()
    }
}

/// `UserStore` backed by in-memory maps.
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryUserStore {
    /// Empty, memory-only store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            snapshot_path: None,
        }
    }

    /// Store mirrored to a JSON file. Existing records are loaded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut inner = Inner::default();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let records: Vec<UserRecord> = serde_json::from_slice(&bytes)?;
                info!("Loaded {} user records from {}", records.len(), path.display());
                for record in records {
                    inner.insert(record);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No user data at {}, starting empty", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            inner: RwLock::new(inner),
            snapshot_path: Some(path),
        })
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.inner.read().await.users.len()
    }

    /// True when no users are stored.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.users.is_empty()
    }

    /// Rewrite the snapshot file. Called with the write lock held and
    /// before the maps change, so a failed write leaves memory untouched.
    ///
    /// Writes a sibling temp file and renames it over the snapshot; a crash
    /// mid-write never leaves a truncated snapshot behind.
    async fn persist(&self, records: Vec<&UserRecord>) -> Result<(), StoreError> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Wrote {} user records to {}", records.len(), path.display());
        Ok(())
    }
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_user(&self, key: &IdentityKey) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.inner.read().await;
        let id = match key {
            IdentityKey::Internal(id) => Some(*id),
            IdentityKey::Provider(provider) => inner.by_provider.get(provider).copied(),
        };
        Ok(id.and_then(|id| inner.users.get(&id).cloned()))
    }

    async fn upsert_user(&self, record: UserRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        self.persist(inner.snapshot_with(&record)).await?;
        inner.insert(record);
        Ok(())
    }

    async fn increment_stats(&self, id: UserId, delta: StatsDelta) -> Result<Stats, StoreError> {
        let mut inner = self.inner.write().await;
        let mut updated = inner.users.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        updated.stats.apply(delta);
        self.persist(inner.snapshot_with(&updated)).await?;

        let stats = updated.stats;
        inner.users.insert(id, updated);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_record(sub: &str) -> UserRecord {
        UserRecord::new(UserId::random(), Some(sub.to_string()), "Ada")
    }

    #[tokio::test]
    async fn test_find_by_either_key() {
        let store = MemoryUserStore::new();
        let record = provider_record("google|123");
        store.upsert_user(record.clone()).await.unwrap();

        let by_id = store.find_user(&IdentityKey::Internal(record.id)).await.unwrap();
        let by_provider = store
            .find_user(&IdentityKey::Provider("google|123".into()))
            .await
            .unwrap();

        assert_eq!(by_id, Some(record.clone()));
        assert_eq!(by_provider, Some(record));
    }

    #[tokio::test]
    async fn test_missing_user() {
        let store = MemoryUserStore::new();
        let found = store.find_user(&IdentityKey::Internal(UserId::random())).await.unwrap();
        assert!(found.is_none());

        let result = store.increment_stats(UserId::random(), StatsDelta::default()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_increment_stats() {
        let store = MemoryUserStore::new();
        let record = UserRecord::new(UserId::random(), None, "Guest");
        store.upsert_user(record.clone()).await.unwrap();

        let delta = StatsDelta { won: 1, lost: 0, played: 1 };
        store.increment_stats(record.id, delta).await.unwrap();
        let stats = store.increment_stats(record.id, delta).await.unwrap();

        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.games_won, 2);
        assert_eq!(stats.games_lost, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryUserStore::new());
        let record = UserRecord::new(UserId::random(), None, "Guest");
        store.upsert_user(record.clone()).await.unwrap();
        let id = record.id;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .increment_stats(id, StatsDelta { won: 0, lost: 1, played: 1 })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let found = store.find_user(&IdentityKey::Internal(id)).await.unwrap().unwrap();
        assert_eq!(found.stats.games_played, 20);
        assert_eq!(found.stats.games_lost, 20);
    }

    #[tokio::test]
    async fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        let record = provider_record("github|9");
        {
            let store = MemoryUserStore::open(&path).await.unwrap();
            assert!(store.is_empty().await);
            store.upsert_user(record.clone()).await.unwrap();
            store
                .increment_stats(record.id, StatsDelta { won: 0, lost: 0, played: 1 })
                .await
                .unwrap();
        }

        let reopened = MemoryUserStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        let found = reopened
            .find_user(&IdentityKey::Provider("github|9".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.stats.games_played, 1);
    }

    #[tokio::test]
    async fn test_failed_upsert_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("users.json");
        let store = MemoryUserStore::open(&path).await.unwrap();

        let record = provider_record("github|10");
        assert!(store.upsert_user(record.clone()).await.is_err());

        assert!(store.is_empty().await);
        assert!(store.find_user(&IdentityKey::Internal(record.id)).await.unwrap().is_none());
        assert!(store
            .find_user(&IdentityKey::Provider("github|10".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_increment_leaves_stats_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        tokio::fs::create_dir(&data_dir).await.unwrap();
        let path = data_dir.join("users.json");

        let store = MemoryUserStore::open(&path).await.unwrap();
        let record = provider_record("github|11");
        store.upsert_user(record.clone()).await.unwrap();

        tokio::fs::remove_dir_all(&data_dir).await.unwrap();
        let delta = StatsDelta { won: 1, lost: 0, played: 1 };
        assert!(store.increment_stats(record.id, delta).await.is_err());

        let found = store.find_user(&IdentityKey::Internal(record.id)).await.unwrap().unwrap();
        assert_eq!(found.stats, Stats::default());
    }

    #[tokio::test]
    async fn test_snapshot_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        let store = MemoryUserStore::open(&path).await.unwrap();
        store.upsert_user(provider_record("github|12")).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec![std::ffi::OsString::from("users.json")]);
    }
}
