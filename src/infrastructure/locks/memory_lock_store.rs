// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::repositories::range_lock_store::{LockStoreError, RangeLockStore};

/// 进程内范围锁存储
///
/// 带过期时间的内存键值表，语义与Redis实现一致。用于单元测试、
/// 流水线测试，以及未配置Redis的本地运行。
#[derive(Default)]
pub struct MemoryRangeLockStore {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    #[allow(dead_code)]
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl MemoryRangeLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // 顺带清理已过期的键
        entries.retain(|_, entry| entry.is_live());
        f(&mut entries)
    }
}

#[async_trait]
impl RangeLockStore for MemoryRangeLockStore {
    async fn acquire(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, LockStoreError> {
        Ok(self.with_entries(|entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
                },
            );
            true
        }))
    }

    async fn release(&self, key: &str) -> Result<bool, LockStoreError> {
        Ok(self.with_entries(|entries| entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> Result<bool, LockStoreError> {
        Ok(self.with_entries(|entries| entries.contains_key(key)))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, LockStoreError> {
        Ok(self.with_entries(|entries| {
            entries
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect()
        }))
    }

    async fn release_all(&self, prefix: &str) -> Result<u64, LockStoreError> {
        Ok(self.with_entries(|entries| {
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            (before - entries.len()) as u64
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_is_set_if_absent() {
        let store = MemoryRangeLockStore::new();

        assert!(store.acquire("k1", "{}", 60).await.unwrap());
        assert!(!store.acquire("k1", "{}", 60).await.unwrap());
        assert!(store.exists("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_reports_whether_key_existed() {
        let store = MemoryRangeLockStore::new();
        store.acquire("k1", "{}", 60).await.unwrap();

        assert!(store.release("k1").await.unwrap());
        assert!(!store.release("k1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_keys_can_be_reacquired() {
        let store = MemoryRangeLockStore::new();

        assert!(store.acquire("k1", "{}", 0).await.unwrap());
        assert!(!store.exists("k1").await.unwrap());
        assert!(store.acquire("k1", "{}", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_and_release_all_respect_prefix() {
        let store = MemoryRangeLockStore::new();
        store.acquire("LOCK_kw:a", "{}", 60).await.unwrap();
        store.acquire("LOCK_kw:b", "{}", 60).await.unwrap();
        store.acquire("LOCK_other:c", "{}", 60).await.unwrap();

        let mut keys = store.scan("LOCK_kw:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["LOCK_kw:a", "LOCK_kw:b"]);

        assert_eq!(store.release_all("LOCK_kw:").await.unwrap(), 2);
        assert!(store.exists("LOCK_other:c").await.unwrap());
    }
}
