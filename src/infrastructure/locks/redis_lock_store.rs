// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;

use crate::domain::repositories::range_lock_store::{LockStoreError, RangeLockStore};
use crate::infrastructure::cache::redis_client::RedisClient;

/// Redis范围锁存储实现
///
/// 获取通过 `SET NX EX` 完成，对仍存活的键重复获取返回 `false`，
/// 全局同一时刻同一键至多一把存活锁。锁在TTL后自动过期，为
/// 崩溃的工作器兜底。
pub struct RedisRangeLockStore {
    client: RedisClient,
}

impl RedisRangeLockStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

fn transport(e: anyhow::Error) -> LockStoreError {
    LockStoreError::Transport(e.to_string())
}

#[async_trait]
impl RangeLockStore for RedisRangeLockStore {
    async fn acquire(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, LockStoreError> {
        self.client
            .set_nx_ex(key, value, ttl_seconds)
            .await
            .map_err(transport)
    }

    async fn release(&self, key: &str) -> Result<bool, LockStoreError> {
        let deleted = self.client.delete(key).await.map_err(transport)?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, LockStoreError> {
        self.client.exists(key).await.map_err(transport)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, LockStoreError> {
        // SCAN MATCH 使用glob模式，前缀中的通配字符需转义
        let pattern = format!("{}*", escape_glob(prefix));
        self.client.scan_keys(&pattern).await.map_err(transport)
    }

    async fn release_all(&self, prefix: &str) -> Result<u64, LockStoreError> {
        let keys = self.scan(prefix).await?;
        self.client.delete_many(&keys).await.map_err(transport)
    }
}

/// 转义Redis glob模式中的通配字符
fn escape_glob(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("LOCK_kw:"), "LOCK_kw:");
        assert_eq!(escape_glob("LOCK_a*b?"), "LOCK_a\\*b\\?");
        assert_eq!(escape_glob("x[1]"), "x\\[1\\]");
    }
}
