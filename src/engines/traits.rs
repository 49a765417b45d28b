// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::date_range::DateRange;
use crate::domain::models::tweet::TweetRecord;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// 超时
    #[error("Timeout")]
    Timeout,

    /// 没有可用的爬取驱动
    #[error("No crawl driver configured")]
    Unavailable,

    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::RequestFailed(_) | EngineError::Timeout)
    }
}

/// 爬取引擎特质
///
/// 实际的HTTP/浏览器抓取驱动是外部协作者，流水线只依赖这一
/// 接缝。单次调用负责一个关键词在一个日期子区间内的采集。
#[async_trait]
pub trait CrawlEngine: Send + Sync {
    /// 在指定日期范围内按关键词采集推文
    ///
    /// # 参数
    ///
    /// * `access_token` - 爬取访问令牌
    /// * `keyword` - 搜索关键词
    /// * `range` - 日期子区间
    /// * `target_count` - 目标记录数
    async fn crawl(
        &self,
        access_token: &str,
        keyword: &str,
        range: &DateRange,
        target_count: usize,
    ) -> Result<Vec<TweetRecord>, EngineError>;

    /// 获取引擎名称
    fn name(&self) -> &'static str;
}
