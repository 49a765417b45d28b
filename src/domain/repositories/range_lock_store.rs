// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use thiserror::Error;

/// 锁存储错误类型
#[derive(Error, Debug)]
pub enum LockStoreError {
    /// 远端缓存传输错误，可重试
    #[error("Lock store transport error: {0}")]
    Transport(String),
}

/// 范围锁存储特质
///
/// 远端缓存上的键值抽象。`acquire` 必须是带过期时间的
/// set-if-absent：对仍然存活的键重复获取返回 `false`。
/// 传输错误永不静默，一律向上传播。
#[async_trait]
pub trait RangeLockStore: Send + Sync {
    /// 获取锁，键已存在时返回 `false`
    async fn acquire(&self, key: &str, value: &str, ttl_seconds: u64)
        -> Result<bool, LockStoreError>;

    /// 释放锁，确实删除了键时返回 `true`
    async fn release(&self, key: &str) -> Result<bool, LockStoreError>;

    /// 键是否存在
    async fn exists(&self, key: &str) -> Result<bool, LockStoreError>;

    /// 枚举匹配前缀的所有存活键
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, LockStoreError>;

    /// 原子删除匹配前缀的所有键，返回删除数量
    async fn release_all(&self, prefix: &str) -> Result<u64, LockStoreError>;
}
