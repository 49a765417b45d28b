// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::models::date_range::DateRange;
use crate::utils::errors::WorkerError;

/// 爬取任务
///
/// 一次入站抓取请求的不可变单元。不变量：`keyword` 非空，
/// `start <= end`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// 所属项目ID
    pub project_id: String,
    /// 搜索关键词
    pub keyword: String,
    /// 请求的日期范围
    pub range: DateRange,
    /// 爬取访问令牌
    pub access_token: String,
}

/// 入站队列消息的线上格式
///
/// 额外字段原样保留，保证对上游格式演进的前向兼容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    pub project_id: Option<String>,
    pub keyword: Option<String>,
    pub start_date_crawl: Option<String>,
    pub end_date_crawl: Option<String>,
    #[serde(rename = "tweetToken")]
    pub tweet_token: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Job {
    /// 从信封负载构建任务
    ///
    /// # 返回值
    ///
    /// * `Ok(Job)` - 字段齐全且合法
    /// * `Err(WorkerError::BadInput)` - 缺少字段或日期非法
    pub fn from_payload(payload: &Value) -> Result<Self, WorkerError> {
        let message: JobMessage = serde_json::from_value(payload.clone())
            .map_err(|e| WorkerError::BadInput(format!("undecodable job payload: {}", e)))?;

        let project_id = message
            .project_id
            .ok_or_else(|| WorkerError::BadInput("missing project_id".into()))?;
        let keyword = message
            .keyword
            .ok_or_else(|| WorkerError::BadInput("missing keyword".into()))?;
        if keyword.trim().is_empty() {
            return Err(WorkerError::BadInput("empty keyword".into()));
        }
        let start = message
            .start_date_crawl
            .ok_or_else(|| WorkerError::BadInput("missing start_date_crawl".into()))?;
        let end = message
            .end_date_crawl
            .ok_or_else(|| WorkerError::BadInput("missing end_date_crawl".into()))?;
        let access_token = message
            .tweet_token
            .ok_or_else(|| WorkerError::BadInput("missing tweetToken".into()))?;

        let range = DateRange::parse(&start, &end)
            .map_err(|e| WorkerError::BadInput(format!("bad crawl range: {}", e)))?;

        Ok(Self {
            project_id,
            keyword,
            range,
            access_token,
        })
    }

    /// 下游通知的最小负载 `{project_id, keyword, start, end}`
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "project_id": self.project_id,
            "keyword": self.keyword,
            "start": self.range.start(),
            "end": self.range.end(),
        })
    }

    /// 由关键词派生过滤用正则
    ///
    /// 按空白切分为词元并以 `|` 连接，大小写不敏感；词元含非法
    /// 正则语法时回退到逐词转义
    pub fn keyword_pattern(&self) -> Regex {
        keyword_pattern(&self.keyword)
    }
}

/// 构建关键词匹配正则
pub fn keyword_pattern(keyword: &str) -> Regex {
    let raw = keyword.split_whitespace().collect::<Vec<_>>().join("|");
    let escaped = keyword
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|");

    RegexBuilder::new(&raw)
        .case_insensitive(true)
        .build()
        .or_else(|_| RegexBuilder::new(&escaped).case_insensitive(true).build())
        // 转义后的交替式不可能再是非法正则
        .unwrap_or_else(|_| Regex::new("$^").unwrap())
}
