// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::domain::models::date_range::DateRange;
use crate::domain::models::tweet::TweetRecord;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 文档存储传输错误
    #[error("Document store error: {0}")]
    Transport(String),
}

/// 推文仓库特质
///
/// 定义爬取记录的追加与查询接口。远端文档存储客户端是外部
/// 协作者，这里只约定接缝。
#[async_trait]
pub trait TweetRepository: Send + Sync {
    /// 无序批量插入，容忍重复；返回实际插入的记录ID
    async fn insert_many(&self, records: &[TweetRecord]) -> Result<Vec<String>, RepositoryError>;

    /// 按关键词正则与创建日期窗口查询
    ///
    /// 匹配条件：`full_text` 命中正则，且 `created_at` 强制转换
    /// 为日期后落在窗口内；无法转换的记录不命中
    async fn find_in_window(
        &self,
        pattern: &Regex,
        window: &DateRange,
    ) -> Result<Vec<TweetRecord>, RepositoryError>;
}
