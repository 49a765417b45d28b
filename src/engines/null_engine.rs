// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;

use crate::domain::models::date_range::DateRange;
use crate::domain::models::tweet::TweetRecord;
use crate::engines::traits::{CrawlEngine, EngineError};

/// 空引擎
///
/// 未接入外部爬取驱动时的占位实现，每次调用都报告驱动不可用。
/// 对应的子区间按爬取失败处理，任务整体以补偿路径结束。
#[derive(Default)]
pub struct NullEngine;

impl NullEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CrawlEngine for NullEngine {
    async fn crawl(
        &self,
        _access_token: &str,
        _keyword: &str,
        _range: &DateRange,
        _target_count: usize,
    ) -> Result<Vec<TweetRecord>, EngineError> {
        Err(EngineError::Unavailable)
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
