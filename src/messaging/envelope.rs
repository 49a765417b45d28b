// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 主管路由的保留目的地段
pub const SUPERVISOR: &str = "supervisor";

/// 信封状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    /// 等待处理
    #[default]
    Pending,
    /// 心跳
    Healthy,
    /// 已完成
    Completed,
    /// 已失败（携带原因码）
    Failed,
    /// 发送方异常，需要重启
    Error,
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EnvelopeStatus::Pending => write!(f, "pending"),
            EnvelopeStatus::Healthy => write!(f, "healthy"),
            EnvelopeStatus::Completed => write!(f, "completed"),
            EnvelopeStatus::Failed => write!(f, "failed"),
            EnvelopeStatus::Error => write!(f, "error"),
        }
    }
}

/// 失败原因码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// 锁存储、文档存储或代理I/O失败
    #[serde(rename = "TRANSPORT")]
    Transport,
    /// 工作器正忙
    #[serde(rename = "SERVER_BUSY")]
    ServerBusy,
    /// 整个任务没有产出记录
    #[serde(rename = "NO_TWEET_FOUND")]
    NoTweetFound,
    /// 外部爬取抛出异常
    #[serde(rename = "CRAWL_FAILED")]
    CrawlFailed,
    /// 任务信封缺少必要字段
    #[serde(rename = "BAD_INPUT")]
    BadInput,
    /// 目的地没有对应的工作器类配置
    #[serde(rename = "UNKNOWN_DESTINATION")]
    UnknownDestination,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::Transport => write!(f, "TRANSPORT"),
            FailureReason::ServerBusy => write!(f, "SERVER_BUSY"),
            FailureReason::NoTweetFound => write!(f, "NO_TWEET_FOUND"),
            FailureReason::CrawlFailed => write!(f, "CRAWL_FAILED"),
            FailureReason::BadInput => write!(f, "BAD_INPUT"),
            FailureReason::UnknownDestination => write!(f, "UNKNOWN_DESTINATION"),
        }
    }
}

impl FromStr for FailureReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSPORT" => Ok(FailureReason::Transport),
            "SERVER_BUSY" => Ok(FailureReason::ServerBusy),
            "NO_TWEET_FOUND" => Ok(FailureReason::NoTweetFound),
            "CRAWL_FAILED" => Ok(FailureReason::CrawlFailed),
            "BAD_INPUT" => Ok(FailureReason::BadInput),
            "UNKNOWN_DESTINATION" => Ok(FailureReason::UnknownDestination),
            _ => Err(()),
        }
    }
}

/// 路由路径 `<WorkerName>/<Method>[/<Param>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// 目标工作器类名
    pub worker: String,
    /// 方法名
    pub method: Option<String>,
    /// 可选参数段
    pub param: Option<String>,
}

impl FromStr for Destination {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let worker = match parts.next() {
            Some(w) if !w.is_empty() => w.to_string(),
            _ => return Err(()),
        };
        let method = parts.next().filter(|m| !m.is_empty()).map(str::to_string);
        let param = parts.next().filter(|p| !p.is_empty()).map(str::to_string);

        Ok(Self {
            worker,
            method,
            param,
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.worker)?;
        if let Some(method) = &self.method {
            write!(f, "/{}", method)?;
        }
        if let Some(param) = &self.param {
            write!(f, "/{}", param)?;
        }
        Ok(())
    }
}

/// 信封
///
/// 主管与其子工作器之间统一的路由+负载记录。进程内传输把所有
/// 工作器复用到同一条主管通道上，所以信封自带 `sender` 标识
/// 来源。双方都必须容忍未知字段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// 全局唯一消息ID
    pub message_id: Uuid,
    /// 状态
    #[serde(default)]
    pub status: EnvelopeStatus,
    /// 失败原因码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// 路由路径列表
    #[serde(default)]
    pub destination: Vec<String>,
    /// 发出信封的工作器实例名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// 因忙碌拒绝本信封的实例名，主管重投时将其排除
    ///
    /// 拒绝不改写 `sender`：应答路由仍需要原始请求方的身份
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    /// 负载
    #[serde(default)]
    pub data: Value,
    /// 前向兼容：未建模字段
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Envelope {
    /// 创建指向单个目的地的信封
    pub fn to(destination: impl Into<String>, data: Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            status: EnvelopeStatus::Pending,
            reason: None,
            destination: vec![destination.into()],
            sender: None,
            rejected_by: None,
            data,
            extra: HashMap::new(),
        }
    }

    /// 设置状态
    pub fn with_status(mut self, status: EnvelopeStatus) -> Self {
        self.status = status;
        self
    }

    /// 设置失败原因
    pub fn with_reason(mut self, reason: FailureReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// 设置发送者
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// 沿用指定消息ID（应答与确认复用请求ID做关联）
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    /// 解析首个目的地
    pub fn first_destination(&self) -> Option<Destination> {
        self.destination.first()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_destination_parsing() {
        let dest: Destination = "DBWorker/get_crawled_data".parse().unwrap();
        assert_eq!(dest.worker, "DBWorker");
        assert_eq!(dest.method.as_deref(), Some("get_crawled_data"));
        assert_eq!(dest.param, None);

        let dest: Destination = "DBWorker/create_new_data/p-1".parse().unwrap();
        assert_eq!(dest.param.as_deref(), Some("p-1"));

        let dest: Destination = "supervisor".parse().unwrap();
        assert_eq!(dest.worker, "supervisor");
        assert_eq!(dest.method, None);

        assert!("".parse::<Destination>().is_err());
    }

    #[test]
    fn test_envelope_tolerates_unknown_fields() {
        let value = json!({
            "message_id": "550e8400-e29b-41d4-a716-446655440000",
            "status": "completed",
            "destination": ["CrawlWorker/crawling"],
            "data": {"keyword": "rust"},
            "trace_id": "abc-123"
        });

        let envelope: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Completed);
        assert_eq!(envelope.extra.get("trace_id"), Some(&json!("abc-123")));
    }

    #[test]
    fn test_reason_wire_format_is_screaming_snake() {
        let envelope = Envelope::to("supervisor", json!({}))
            .with_status(EnvelopeStatus::Failed)
            .with_reason(FailureReason::NoTweetFound);

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["reason"], "NO_TWEET_FOUND");
        assert_eq!(value["status"], "failed");
    }

    #[test]
    fn test_failure_reason_from_str() {
        assert_eq!(
            "SERVER_BUSY".parse::<FailureReason>(),
            Ok(FailureReason::ServerBusy)
        );
        assert!("NOPE".parse::<FailureReason>().is_err());
    }
}
