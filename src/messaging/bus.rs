// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::messaging::envelope::Envelope;

/// 请求错误类型
#[derive(Error, Debug)]
pub enum RequestError {
    /// 等待应答超时
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// 主管通道已关闭
    #[error("Supervisor channel closed")]
    ChannelClosed,

    /// 关联条目在等待期间被丢弃
    #[error("Correlation dropped before reply")]
    Dropped,
}

/// 请求关联表
///
/// 以 `message_id` 为键记录在途的请求/应答对。工作器主循环收到
/// 关联应答时通过 `complete` 唤醒等待方；没有等待方的应答视为
/// 过期。
#[derive(Default)]
pub struct Correlations {
    inner: DashMap<Uuid, oneshot::Sender<Envelope>>,
}

impl Correlations {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个等待中的请求
    pub fn register(&self, message_id: Uuid) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(message_id, tx);
        rx
    }

    /// 用应答信封完成关联
    ///
    /// # 返回值
    ///
    /// 存在等待方并成功投递返回 `true`，否则 `false`
    pub fn complete(&self, reply: Envelope) -> bool {
        match self.inner.remove(&reply.message_id) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// 撤销登记（超时清理）
    pub fn cancel(&self, message_id: &Uuid) {
        self.inner.remove(message_id);
    }

    /// 在途请求数量
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// 通过主管通道发出请求并等待关联应答
///
/// 应答由对端以相同 `message_id` 发回，经主管路由回请求方，
/// 请求方主循环调用 `Correlations::complete` 完成本次等待。
/// 超时按传输失败处理。
pub async fn request(
    outbox: &mpsc::Sender<Envelope>,
    correlations: &Correlations,
    envelope: Envelope,
    timeout: Duration,
) -> Result<Envelope, RequestError> {
    let message_id = envelope.message_id;
    let rx = correlations.register(message_id);

    if outbox.send(envelope).await.is_err() {
        correlations.cancel(&message_id);
        return Err(RequestError::ChannelClosed);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(_)) => Err(RequestError::Dropped),
        Err(_) => {
            correlations.cancel(&message_id);
            Err(RequestError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::envelope::EnvelopeStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_receives_correlated_reply() {
        let (tx, mut rx) = mpsc::channel(8);
        let correlations = Correlations::new();

        let envelope = Envelope::to("DBWorker/get_crawled_data", json!({"keyword": "rust"}));
        let message_id = envelope.message_id;

        let waiter = request(&tx, &correlations, envelope, Duration::from_secs(1));
        let responder = async {
            let sent = rx.recv().await.unwrap();
            let reply = Envelope::to("CrawlWorker/on_fetched_data", json!({"data": []}))
                .with_message_id(sent.message_id)
                .with_status(EnvelopeStatus::Completed);
            assert!(correlations.complete(reply));
        };

        let (result, _) = tokio::join!(waiter, responder);
        let reply = result.unwrap();
        assert_eq!(reply.message_id, message_id);
        assert_eq!(reply.status, EnvelopeStatus::Completed);
    }

    #[tokio::test]
    async fn test_request_times_out_and_cleans_up() {
        let (tx, _rx) = mpsc::channel(8);
        let correlations = Correlations::new();

        let envelope = Envelope::to("DBWorker/get_crawled_data", json!({}));
        let result = request(&tx, &correlations, envelope, Duration::from_millis(20)).await;

        assert!(matches!(result, Err(RequestError::Timeout(_))));
        assert!(correlations.is_empty());
    }

    #[tokio::test]
    async fn test_stale_reply_is_rejected() {
        let correlations = Correlations::new();
        let reply = Envelope::to("CrawlWorker/on_fetched_data", json!({}));

        assert!(!correlations.complete(reply));
    }
}
