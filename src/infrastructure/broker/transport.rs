// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// 代理错误类型
#[derive(Error, Debug)]
pub enum BrokerError {
    /// 连接层传输错误
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// 连接已关闭或被对端阻断
    #[error("Broker connection closed")]
    Closed,
}

/// 代理传输特质
///
/// 对消息代理的最小抽象：持久化队列的声明、消费与发布。
/// 真实AMQP客户端是外部协作者，这里只约定接缝。`consume`
/// 挂起直到有消息可取或连接失效。
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// 确保队列存在（持久化声明）
    async fn ensure_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// 取出队列中的下一条消息，无消息时挂起
    async fn consume(&self, queue: &str) -> Result<Vec<u8>, BrokerError>;

    /// 向队列发布一条消息
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// 进程内代理传输
///
/// 每个队列一个内存双端队列，消费端空队列时在通知位上挂起。
/// 用于测试与未接入代理的本地运行。
#[derive(Default)]
pub struct MemoryBrokerTransport {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    notify: Notify,
}

impl MemoryBrokerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前队列深度（测试辅助）
    pub fn depth(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// 弹出队首消息而不挂起（测试辅助）
    pub fn pop(&self, queue: &str) -> Option<Vec<u8>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl BrokerTransport for MemoryBrokerTransport {
    async fn ensure_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Vec<u8>, BrokerError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // 先登记唤醒兴趣再检查队列，避免漏掉并发发布
            notified.as_mut().enable();
            if let Some(payload) = self.pop(queue) {
                return Ok(payload);
            }
            notified.await;
        }
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_vec());
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_then_consume() {
        let transport = MemoryBrokerTransport::new();
        transport.ensure_queue("q").await.unwrap();
        transport.publish("q", b"one").await.unwrap();
        transport.publish("q", b"two").await.unwrap();

        assert_eq!(transport.consume("q").await.unwrap(), b"one");
        assert_eq!(transport.consume("q").await.unwrap(), b"two");
        assert_eq!(transport.depth("q"), 0);
    }

    #[tokio::test]
    async fn test_consume_wakes_on_later_publish() {
        let transport = Arc::new(MemoryBrokerTransport::new());

        let consumer = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.consume("q").await.unwrap() })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        transport.publish("q", b"late").await.unwrap();

        assert_eq!(consumer.await.unwrap(), b"late");
    }
}
