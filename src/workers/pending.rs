// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use uuid::Uuid;

use crate::messaging::envelope::Envelope;

/// 待确认消息表
///
/// 按工作器类名维护已投递但尚未确认完成的信封，投递前插入，
/// 收到同 `message_id` 的完成确认后移除，工作器类重生时整体
/// 重放。同一类下按 `message_id` 去重。
#[derive(Default)]
pub struct PendingMessageTable {
    entries: HashMap<String, Vec<Envelope>>,
}

impl PendingMessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一条待确认信封
    ///
    /// # 返回值
    ///
    /// 已存在同ID条目时返回 `false`
    pub fn insert(&mut self, class: &str, envelope: &Envelope) -> bool {
        let entries = self.entries.entry(class.to_string()).or_default();
        if entries
            .iter()
            .any(|existing| existing.message_id == envelope.message_id)
        {
            return false;
        }
        entries.push(envelope.clone());
        true
    }

    /// 按消息ID移除条目
    ///
    /// 给定类名提示时只在该类下查找；没有提示时扫描全表
    pub fn remove(&mut self, class: Option<&str>, message_id: Uuid) -> Option<Envelope> {
        match class {
            Some(class) => {
                let entries = self.entries.get_mut(class)?;
                let pos = entries.iter().position(|e| e.message_id == message_id)?;
                Some(entries.remove(pos))
            }
            None => {
                for entries in self.entries.values_mut() {
                    if let Some(pos) = entries.iter().position(|e| e.message_id == message_id) {
                        return Some(entries.remove(pos));
                    }
                }
                None
            }
        }
    }

    /// 某类当前待确认的信封（保持插入顺序）
    pub fn class_entries(&self, class: &str) -> Vec<Envelope> {
        self.entries.get(class).cloned().unwrap_or_default()
    }

    /// 某类待确认条目数
    pub fn class_len(&self, class: &str) -> usize {
        self.entries.get(class).map(Vec::len).unwrap_or(0)
    }

    /// 全表条目数
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> Envelope {
        Envelope::to("CrawlWorker/crawling", json!({"keyword": "rust"}))
    }

    #[test]
    fn test_insert_deduplicates_by_message_id() {
        let mut table = PendingMessageTable::new();
        let env = envelope();

        assert!(table.insert("CrawlWorker", &env));
        assert!(!table.insert("CrawlWorker", &env));
        assert_eq!(table.class_len("CrawlWorker"), 1);
    }

    #[test]
    fn test_same_id_under_different_classes() {
        // 请求与其应答复用同一ID，但分属不同类，互不挤占
        let mut table = PendingMessageTable::new();
        let env = envelope();

        assert!(table.insert("DBWorker", &env));
        assert!(table.insert("CrawlWorker", &env));

        assert!(table.remove(Some("DBWorker"), env.message_id).is_some());
        assert_eq!(table.class_len("CrawlWorker"), 1);
        assert_eq!(table.class_len("DBWorker"), 0);
    }

    #[test]
    fn test_remove_without_hint_scans_all_classes() {
        let mut table = PendingMessageTable::new();
        let env = envelope();
        table.insert("DBWorker", &env);

        assert!(table.remove(None, env.message_id).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_class_entries_keep_insertion_order() {
        let mut table = PendingMessageTable::new();
        let first = envelope();
        let second = envelope();
        table.insert("CrawlWorker", &first);
        table.insert("CrawlWorker", &second);

        let entries = table.class_entries("CrawlWorker");
        assert_eq!(entries[0].message_id, first.message_id);
        assert_eq!(entries[1].message_id, second.message_id);
    }
}
