// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

use crate::messaging::envelope::FailureReason;

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    /// 传输错误（锁存储、文档存储或消息代理I/O失败）
    #[error("传输错误: {0}")]
    Transport(String),

    /// 无效输入（任务信封缺少必要字段）
    #[error("无效输入: {0}")]
    BadInput(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl WorkerError {
    /// 映射到信封失败原因码
    pub fn reason(&self) -> FailureReason {
        match self {
            WorkerError::Transport(_) => FailureReason::Transport,
            WorkerError::BadInput(_) => FailureReason::BadInput,
            WorkerError::Internal(_) => FailureReason::Transport,
        }
    }
}
