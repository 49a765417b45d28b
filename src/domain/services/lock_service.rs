// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::models::date_range::DateRange;
use crate::domain::repositories::range_lock_store::{LockStoreError, RangeLockStore};

/// 爬取范围锁管理器
///
/// 在键值锁存储之上提供日期范围语义：获取/释放一个范围、
/// 枚举某关键词的全部范围、合并相邻或重叠范围、检测请求窗口
/// 的重叠、以及从请求窗口减去重叠得到残差子区间。
///
/// 本地不持有任何持久状态，全部状态都在锁存储里。
pub struct CrawlLockManager {
    store: Arc<dyn RangeLockStore>,
    namespace: String,
    ttl_seconds: u64,
}

impl CrawlLockManager {
    /// 创建新的范围锁管理器
    ///
    /// # 参数
    ///
    /// * `store` - 锁存储
    /// * `namespace` - 键命名空间前缀（参考值 `LOCK_`）
    /// * `ttl_seconds` - 锁过期时间，必须大于最坏情况的单段爬取时长
    pub fn new(store: Arc<dyn RangeLockStore>, namespace: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl_seconds,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// 编码锁键 `<ns><keyword>:<start>:<end>`
    pub fn encode_key(&self, keyword: &str, range: &DateRange) -> String {
        format!(
            "{}{}:{}:{}",
            self.namespace,
            keyword,
            range.start(),
            range.end()
        )
    }

    /// 某关键词的键前缀
    fn keyword_prefix(&self, keyword: &str) -> String {
        format!("{}{}:", self.namespace, keyword)
    }

    /// 解码锁键，非法键返回 `None`
    ///
    /// 关键词本身可能含有 `:`，从右侧切出两段日期
    pub fn decode_key(&self, key: &str) -> Option<(String, DateRange)> {
        let rest = key.strip_prefix(&self.namespace)?;
        let mut parts = rest.rsplitn(3, ':');
        let end = parts.next()?;
        let start = parts.next()?;
        let keyword = parts.next()?;

        let range = DateRange::parse(start, end).ok()?;
        Some((keyword.to_string(), range))
    }

    /// 获取一个范围的锁
    ///
    /// # 返回值
    ///
    /// * `Ok(true)` - 成功，当前进程负责该范围
    /// * `Ok(false)` - 锁仍存活，其他工作器负责
    /// * `Err(LockStoreError)` - 传输失败
    pub async fn acquire_range(
        &self,
        keyword: &str,
        range: &DateRange,
    ) -> Result<bool, LockStoreError> {
        let key = self.encode_key(keyword, range);
        let value = serde_json::json!({ "timestamp": Utc::now().timestamp_millis() });
        let acquired = self
            .store
            .acquire(&key, &value.to_string(), self.ttl_seconds)
            .await?;

        if acquired {
            metrics::counter!("harvest_locks_acquired_total").increment(1);
            debug!(key = %key, "Range lock acquired");
        } else {
            metrics::counter!("harvest_lock_contention_total").increment(1);
            debug!(key = %key, "Range lock already held");
        }
        Ok(acquired)
    }

    /// 释放一个范围的锁
    pub async fn release_range(
        &self,
        keyword: &str,
        range: &DateRange,
    ) -> Result<bool, LockStoreError> {
        let key = self.encode_key(keyword, range);
        let released = self.store.release(&key).await?;
        debug!(key = %key, released, "Range lock released");
        Ok(released)
    }

    /// 枚举某关键词当前存活的全部锁定范围（未合并）
    pub async fn list_ranges(&self, keyword: &str) -> Result<Vec<DateRange>, LockStoreError> {
        let keys = self.store.scan(&self.keyword_prefix(keyword)).await?;

        let mut ranges = Vec::with_capacity(keys.len());
        for key in keys {
            match self.decode_key(&key) {
                Some((_, range)) => ranges.push(range),
                None => warn!(key = %key, "Skipping undecodable lock key"),
            }
        }
        Ok(ranges)
    }

    /// 原子清除某关键词的全部锁
    pub async fn release_keyword(&self, keyword: &str) -> Result<u64, LockStoreError> {
        self.store.release_all(&self.keyword_prefix(keyword)).await
    }

    /// 检测请求窗口与存活锁的重叠
    ///
    /// 扫描关键词下所有存活锁，解码、合并后与 `[req.start, req.end]`
    /// 求交。无交集时返回空列表。
    pub async fn overlap(
        &self,
        keyword: &str,
        req: &DateRange,
    ) -> Result<Vec<DateRange>, LockStoreError> {
        let merged = Self::merge_ranges(self.list_ranges(keyword).await?);
        Ok(merged
            .iter()
            .filter_map(|range| range.intersection(req))
            .collect())
    }

    /// 合并日期范围列表
    ///
    /// 按起始日排序后熔合所有重叠或相邻（间隔不超过1天）的相邻
    /// 范围。输出有序、两两不相交、互不相邻。
    pub fn merge_ranges(mut ranges: Vec<DateRange>) -> Vec<DateRange> {
        ranges.sort_by_key(|r| r.start());

        let mut merged: Vec<DateRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if last.touches(&range) => last.extend(&range),
                _ => merged.push(range),
            }
        }
        merged
    }

    /// 从请求窗口减去重叠，得到仍需爬取的残差子区间
    ///
    /// 游标从 `req.start` 扫到 `req.end`，每个相交的重叠段把
    /// 游标推进到其结束日的次日；段间空隙作为残差输出。
    /// 输出有序且两两不相交。
    pub fn subtract(req: &DateRange, overlaps: &[DateRange]) -> Vec<DateRange> {
        let mut sorted: Vec<DateRange> = overlaps.to_vec();
        sorted.sort_by_key(|r| r.start());

        let mut residuals = Vec::new();
        let mut cursor = req.start();

        for overlap in sorted {
            if cursor > req.end() {
                break;
            }
            if overlap.end() < cursor || overlap.start() > req.end() {
                continue;
            }
            if cursor < overlap.start() {
                // overlap.start() > cursor，前一日必然存在
                if let Some(gap_end) = overlap.start().pred_opt() {
                    if let Ok(residual) = DateRange::new(cursor, gap_end) {
                        residuals.push(residual);
                    }
                }
            }
            cursor = match overlap.end().succ_opt() {
                Some(next) => next,
                None => return residuals, // 日历上限，窗口已被覆盖到尽头
            };
        }

        if cursor <= req.end() {
            if let Ok(tail) = DateRange::new(cursor, req.end()) {
                residuals.push(tail);
            }
        }
        residuals
    }
}
