// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::settings::BrokerSettings;
use crate::infrastructure::broker::transport::BrokerTransport;
use crate::messaging::envelope::{Envelope, EnvelopeStatus, FailureReason};
use crate::workers::worker::{
    ack_envelope, error_envelope, heartbeat_envelope, instance_name, Worker,
};
use crate::workers::{BROKER_GATEWAY, CRAWL_WORKER};
use async_trait::async_trait;

/// 消息代理网关
///
/// 消费入站任务队列并改写为主管信封；把完成信封发布到下游
/// 队列，把无记录结束的失败信封发布到补偿队列。连接失效时向
/// 主管上报异常信封，重启即重连。
pub struct BrokerGateway {
    worker_name_id: String,
    transport: Arc<dyn BrokerTransport>,
    queues: BrokerSettings,
    outbox: mpsc::Sender<Envelope>,
    heartbeat_interval: Duration,
}

impl BrokerGateway {
    /// 创建新的代理网关实例
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        queues: BrokerSettings,
        outbox: mpsc::Sender<Envelope>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            worker_name_id: instance_name(BROKER_GATEWAY),
            transport,
            queues,
            outbox,
            heartbeat_interval,
        }
    }

    /// 入站负载改写为爬取任务信封
    async fn ingest(&self, payload: &[u8]) {
        metrics::counter!("harvest_jobs_consumed_total").increment(1);

        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => {
                let envelope = Envelope::to(format!("{}/crawling", CRAWL_WORKER), value)
                    .with_status(EnvelopeStatus::Completed)
                    .with_sender(&self.worker_name_id);
                debug!(worker = %self.worker_name_id, id = %envelope.message_id, "Inbound job accepted");
                if self.outbox.send(envelope).await.is_err() {
                    warn!(worker = %self.worker_name_id, "Supervisor channel closed, job dropped");
                }
            }
            Err(e) => {
                warn!(worker = %self.worker_name_id, error = %e, "Dropping malformed inbound payload");
            }
        }
    }

    /// 按状态分流出站信封
    ///
    /// # 返回值
    ///
    /// 发布失败返回 `false`，触发重启重连
    async fn produce(&self, envelope: &Envelope) -> bool {
        let queue = match (envelope.status, envelope.reason) {
            (EnvelopeStatus::Completed, _) => &self.queues.data_gathering_queue,
            (EnvelopeStatus::Failed, Some(FailureReason::NoTweetFound)) => {
                &self.queues.compensation_queue
            }
            _ => {
                warn!(
                    worker = %self.worker_name_id,
                    status = %envelope.status,
                    reason = ?envelope.reason,
                    "Envelope not eligible for publication, dropping"
                );
                return true;
            }
        };

        let payload = envelope.data.to_string();
        match self.transport.publish(queue, payload.as_bytes()).await {
            Ok(()) => {
                metrics::counter!("harvest_messages_published_total").increment(1);
                debug!(worker = %self.worker_name_id, queue = %queue, "Payload published");
                let _ = self
                    .outbox
                    .send(ack_envelope(envelope.message_id, &self.worker_name_id))
                    .await;
                true
            }
            Err(e) => {
                error!(worker = %self.worker_name_id, queue = %queue, error = %e, "Publish failed");
                false
            }
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) -> bool {
        let Some(dest) = envelope.first_destination() else {
            warn!(worker = %self.worker_name_id, "Envelope without destination");
            return true;
        };

        match dest.method.as_deref() {
            Some("produce_data") => self.produce(&envelope).await,
            other => {
                warn!(worker = %self.worker_name_id, method = ?other, "Unsupported method");
                true
            }
        }
    }
}

#[async_trait]
impl Worker for BrokerGateway {
    async fn run(self: Box<Self>, mut inbox: mpsc::Receiver<Envelope>) {
        info!(worker = %self.worker_name_id, "Broker gateway started");

        for queue in [
            &self.queues.project_queue,
            &self.queues.data_gathering_queue,
            &self.queues.compensation_queue,
        ] {
            if let Err(e) = self.transport.ensure_queue(queue).await {
                error!(worker = %self.worker_name_id, queue = %queue, error = %e, "Queue declaration failed");
                let _ = self
                    .outbox
                    .send(error_envelope(&self.worker_name_id, &e.to_string()))
                    .await;
                return;
            }
        }

        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = inbox.recv() => match maybe {
                    Some(envelope) => {
                        if !self.handle_envelope(envelope).await {
                            // 发布失败视为连接失效，上报后退出等待重启
                            let _ = self
                                .outbox
                                .send(error_envelope(&self.worker_name_id, "publish failed"))
                                .await;
                            break;
                        }
                    }
                    None => break,
                },
                consumed = self.transport.consume(&self.queues.project_queue) => match consumed {
                    Ok(payload) => self.ingest(&payload).await,
                    Err(e) => {
                        error!(worker = %self.worker_name_id, error = %e, "Consume failed, requesting restart");
                        let _ = self
                            .outbox
                            .send(error_envelope(&self.worker_name_id, &e.to_string()))
                            .await;
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    let _ = self.outbox.send(heartbeat_envelope(&self.worker_name_id)).await;
                }
            }
        }

        info!(worker = %self.worker_name_id, "Broker gateway stopping");
    }

    fn worker_name_id(&self) -> &str {
        &self.worker_name_id
    }

    fn class(&self) -> &'static str {
        BROKER_GATEWAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::broker::transport::MemoryBrokerTransport;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn gateway() -> (BrokerGateway, Arc<MemoryBrokerTransport>, mpsc::Receiver<Envelope>) {
        let transport = Arc::new(MemoryBrokerTransport::new());
        let (tx, rx) = mpsc::channel(16);
        let queues = BrokerSettings {
            url: "amqp://test".into(),
            project_queue: "project_queue".into(),
            data_gathering_queue: "data_gathering_queue".into(),
            compensation_queue: "compensation_queue".into(),
        };
        let gateway = BrokerGateway::new(
            transport.clone(),
            queues,
            tx,
            Duration::from_secs(60),
        );
        (gateway, transport, rx)
    }

    #[tokio::test]
    async fn test_ingest_rewrites_payload_into_envelope() {
        let (gateway, _transport, mut rx) = gateway();
        let payload = json!({"project_id": "p-1", "keyword": "rust"});

        gateway.ingest(payload.to_string().as_bytes()).await;

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.destination, vec!["CrawlWorker/crawling"]);
        assert_eq!(envelope.status, EnvelopeStatus::Completed);
        assert_eq!(envelope.data, payload);
        assert!(envelope.sender.is_some());
    }

    #[tokio::test]
    async fn test_ingest_drops_malformed_payload() {
        let (gateway, _transport, mut rx) = gateway();

        gateway.ingest(b"{not json").await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_produce_routes_completed_to_data_queue() {
        let (gateway, transport, mut rx) = gateway();
        let envelope = Envelope::to("BrokerGateway/produce_data/p-1", json!({"keyword": "rust"}))
            .with_status(EnvelopeStatus::Completed);
        let message_id = envelope.message_id;

        assert!(gateway.produce(&envelope).await);

        let published = transport.pop("data_gathering_queue").unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&published).unwrap(),
            json!({"keyword": "rust"})
        );

        // 发布成功后向主管确认
        let ack = rx.recv().await.unwrap();
        assert_eq!(ack.message_id, message_id);
        assert_eq!(ack.status, EnvelopeStatus::Completed);
    }

    #[tokio::test]
    async fn test_produce_routes_no_tweet_found_to_compensation() {
        let (gateway, transport, _rx) = gateway();
        let envelope = Envelope::to("BrokerGateway/produce_data/p-2", json!({"project_id": "p-2"}))
            .with_status(EnvelopeStatus::Failed)
            .with_reason(FailureReason::NoTweetFound);

        assert!(gateway.produce(&envelope).await);

        assert!(transport.pop("compensation_queue").is_some());
        assert!(transport.pop("data_gathering_queue").is_none());
    }

    #[tokio::test]
    async fn test_produce_drops_other_failures() {
        let (gateway, transport, _rx) = gateway();
        let envelope = Envelope::to("BrokerGateway/produce_data/p-3", json!({}))
            .with_status(EnvelopeStatus::Failed)
            .with_reason(FailureReason::Transport);

        assert!(gateway.produce(&envelope).await);

        assert!(transport.pop("compensation_queue").is_none());
        assert!(transport.pop("data_gathering_queue").is_none());
    }
}
