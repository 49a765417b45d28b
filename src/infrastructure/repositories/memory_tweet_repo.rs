// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::date_range::DateRange;
use crate::domain::models::tweet::TweetRecord;
use crate::domain::repositories::tweet_repository::{RepositoryError, TweetRepository};

/// 进程内推文仓库
///
/// 只追加的内存集合，查询语义与远端文档存储一致。用于测试与
/// 未接入远端存储的本地运行。
#[derive(Default)]
pub struct MemoryTweetRepository {
    records: Mutex<Vec<TweetRecord>>,
}

impl MemoryTweetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录总数
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TweetRepository for MemoryTweetRepository {
    async fn insert_many(&self, records: &[TweetRecord]) -> Result<Vec<String>, RepositoryError> {
        let mut stored = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            // 无序插入，按记录ID容忍重复；没有ID的记录补发一个
            let mut record = record.clone();
            if record.id.is_empty() {
                record.id = Uuid::new_v4().to_string();
            }
            if stored.iter().any(|existing| existing.id == record.id) {
                continue;
            }
            inserted.push(record.id.clone());
            stored.push(record);
        }
        Ok(inserted)
    }

    async fn find_in_window(
        &self,
        pattern: &Regex,
        window: &DateRange,
    ) -> Result<Vec<TweetRecord>, RepositoryError> {
        let stored = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        Ok(stored
            .iter()
            .filter(|record| {
                pattern.is_match(&record.full_text)
                    && record
                        .created_date()
                        .is_some_and(|day| window.start() <= day && day <= window.end())
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::job::keyword_pattern;
    use std::collections::HashMap;

    fn record(id: &str, text: &str, created_at: &str) -> TweetRecord {
        TweetRecord {
            id: id.into(),
            full_text: text.into(),
            created_at: created_at.into(),
            extra: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_many_skips_duplicates() {
        let repo = MemoryTweetRepository::new();
        let records = vec![
            record("1", "rust is fast", "2024-01-02"),
            record("1", "rust is fast", "2024-01-02"),
            record("2", "tokio runtime", "2024-01-03"),
        ];

        let inserted = repo.insert_many(&records).await.unwrap();
        assert_eq!(inserted, vec!["1", "2"]);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_many_empty_is_noop() {
        let repo = MemoryTweetRepository::new();
        let inserted = repo.insert_many(&[]).await.unwrap();
        assert!(inserted.is_empty());
    }

    #[tokio::test]
    async fn test_find_in_window_applies_pattern_and_dates() {
        let repo = MemoryTweetRepository::new();
        repo.insert_many(&[
            record("1", "Rust ships", "2024-01-02T10:00:00Z"),
            record("2", "rust again", "2024-02-02"),
            record("3", "golang only", "2024-01-02"),
            record("4", "rust undated", "nonsense"),
        ])
        .await
        .unwrap();

        let window = DateRange::parse("2024-01-01", "2024-01-31").unwrap();
        let found = repo
            .find_in_window(&keyword_pattern("rust"), &window)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");
    }
}
