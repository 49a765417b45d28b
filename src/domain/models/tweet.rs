// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::models::date_range::parse_day;

/// 推文记录
///
/// 爬取产出的文档。管道只读取 `full_text` 和 `created_at`，
/// 其余字段原样透传到存储。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetRecord {
    /// 记录ID
    #[serde(default, alias = "id_str")]
    pub id: String,
    /// 全文
    #[serde(default)]
    pub full_text: String,
    /// 创建时间，可被强制转换为日期的任意格式
    #[serde(default)]
    pub created_at: String,
    /// 未建模字段
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl TweetRecord {
    /// 创建时间截断到自然日
    pub fn created_date(&self) -> Option<NaiveDate> {
        parse_day(&self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_created_date_from_iso() {
        let record = TweetRecord {
            id: "1".into(),
            full_text: "hello".into(),
            created_at: "2024-01-03T09:00:00Z".into(),
            extra: HashMap::new(),
        };

        assert_eq!(
            record.created_date(),
            NaiveDate::from_ymd_opt(2024, 1, 3)
        );
    }

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let value = json!({
            "id_str": "42",
            "full_text": "rust",
            "created_at": "2024-01-01",
            "retweet_count": 7,
            "user": {"screen_name": "a"}
        });

        let record: TweetRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.extra.get("retweet_count"), Some(&json!(7)));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["user"]["screen_name"], "a");
    }
}
