// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use redis::AsyncCommands;

/// Redis客户端
///
/// 提供对Redis数据库的异步操作接口
#[derive(Clone)]
pub struct RedisClient {
    /// Redis客户端
    client: redis::Client,
}

impl RedisClient {
    /// 创建新的Redis客户端实例
    ///
    /// # 参数
    ///
    /// * `redis_url` - Redis连接URL
    ///
    /// # 返回值
    ///
    /// * `Ok(RedisClient)` - Redis客户端实例
    /// * `Err(anyhow::Error)` - 创建过程中出现的错误
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// 获取指定键的值
    ///
    /// # 参数
    ///
    /// * `key` - 键
    ///
    /// # 返回值
    ///
    /// * `Ok(Option<String>)` - 键对应的值，如果不存在则返回None
    /// * `Err(anyhow::Error)` - 获取过程中出现的错误
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    /// 仅当键不存在时写入，并指定过期时间
    ///
    /// 对远端执行 `SET key value NX EX ttl`，是分布式范围锁的
    /// 获取原语
    ///
    /// # 返回值
    ///
    /// * `Ok(true)` - 写入成功
    /// * `Ok(false)` - 键已存在且仍存活
    /// * `Err(anyhow::Error)` - 传输错误
    pub async fn set_nx_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut con)
            .await?;
        Ok(reply.is_some())
    }

    /// 设置键值对并指定过期时间
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        con.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
        Ok(())
    }

    /// 删除单个键
    ///
    /// # 返回值
    ///
    /// * `Ok(u64)` - 被删除的键数量（0或1）
    /// * `Err(anyhow::Error)` - 删除过程中出现的错误
    pub async fn delete(&self, key: &str) -> Result<u64> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let deleted: u64 = con.del(key).await?;
        Ok(deleted)
    }

    /// 一次删除多个键
    ///
    /// 单条 `DEL` 命令在Redis侧是原子的
    pub async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let deleted: u64 = con.del(keys).await?;
        Ok(deleted)
    }

    /// 键是否存在
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = con.exists(key).await?;
        Ok(exists)
    }

    /// 枚举匹配模式的所有键
    ///
    /// 使用 `SCAN` 游标遍历，避免阻塞式 `KEYS`
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut con = self.client.get_multiplexed_async_connection().await?;

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}
