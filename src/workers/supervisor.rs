// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::settings::{SupervisorSettings, WorkerClassSettings};
use crate::messaging::envelope::{
    Destination, Envelope, EnvelopeStatus, FailureReason, SUPERVISOR,
};
use crate::utils::retry_policy::RetryPolicy;
use crate::workers::factory::WorkerFactory;
use crate::workers::pending::PendingMessageTable;
use crate::workers::worker::WorkerHandle;

/// 子工作器健康记录
///
/// 每收到一个 `healthy` 信封刷新；过期只降级记录日志
#[derive(Debug, Clone)]
pub struct WorkerHealth {
    /// 实例名
    pub worker_name_id: String,
    /// 最近一次心跳
    pub last_heartbeat: DateTime<Utc>,
    /// 是否健康
    pub healthy: bool,
}

/// 主管
///
/// 独占持有子工作器花名册与待确认消息表。职责：按类配置启动
/// 实例、按目的地首段路由信封、投递前登记待确认、异常与退出
/// 时重启并重放、聚合心跳。
pub struct Supervisor {
    factory: Arc<dyn WorkerFactory>,
    classes: HashMap<String, WorkerClassSettings>,
    roster: Vec<WorkerHandle>,
    pending: PendingMessageTable,
    health: HashMap<String, WorkerHealth>,
    inbox: mpsc::Receiver<Envelope>,
    loopback: mpsc::Sender<Envelope>,
    defer_policy: RetryPolicy,
    stale_after: chrono::Duration,
    watchdog_interval: Duration,
}

impl Supervisor {
    /// 创建新的主管实例
    ///
    /// # 参数
    ///
    /// * `factory` - 工作器工厂
    /// * `classes` - 各类工作器配置
    /// * `settings` - 主管配置
    pub fn new(
        factory: Arc<dyn WorkerFactory>,
        classes: HashMap<String, WorkerClassSettings>,
        settings: &SupervisorSettings,
    ) -> Self {
        let (loopback, inbox) = mpsc::channel(settings.channel_capacity);
        Self {
            factory,
            classes,
            roster: Vec::new(),
            pending: PendingMessageTable::new(),
            health: HashMap::new(),
            inbox,
            loopback,
            defer_policy: RetryPolicy::fixed(settings.defer_backoff()),
            stale_after: chrono::Duration::seconds(settings.stale_after_secs as i64),
            watchdog_interval: settings.watchdog_interval(),
        }
    }

    /// 通往主管的信封发送端（外部注入用）
    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.loopback.clone()
    }

    /// 按配置启动所有工作器类
    fn start(&mut self) {
        let classes: Vec<(String, usize)> = self
            .classes
            .iter()
            .map(|(name, cfg)| (name.clone(), cfg.count))
            .collect();

        for (class, count) in classes {
            for _ in 0..count {
                if self.spawn_instance(&class).is_none() {
                    error!(class = %class, "Failed to spawn configured worker");
                }
            }
        }
        info!(workers = self.roster.len(), "Supervisor roster initialized");
    }

    /// 运行主管主循环
    ///
    /// 消费子工作器信封并周期巡检。回环发送端握在主管手里，
    /// 通道不会自行关闭，循环随进程存活。
    pub async fn run(mut self) {
        self.start();

        let mut watchdog = interval(self.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = self.inbox.recv() => match maybe {
                    Some(envelope) => self.handle_worker_message(envelope).await,
                    None => break,
                },
                _ = watchdog.tick() => self.patrol().await,
            }
        }
    }

    /// 生成一个类实例并入册
    fn spawn_instance(&mut self, class: &str) -> Option<usize> {
        let config = self.classes.get(class)?;
        let handle = self
            .factory
            .spawn(class, config, self.loopback.clone())?;

        info!(
            class = %class,
            worker = %handle.worker_name_id,
            cpu = ?config.cpu,
            memory = ?config.memory,
            "Worker spawned"
        );
        metrics::counter!("harvest_workers_spawned_total").increment(1);
        self.roster.push(handle);
        Some(self.roster.len() - 1)
    }

    async fn handle_worker_message(&mut self, envelope: Envelope) {
        metrics::counter!("harvest_messages_routed_total").increment(1);

        if envelope.status == EnvelopeStatus::Healthy {
            self.record_heartbeat(envelope.sender.as_deref());
            return;
        }
        if envelope.status == EnvelopeStatus::Error {
            match envelope.sender.clone() {
                Some(sender) => self.restart_worker(&sender).await,
                None => warn!("Error envelope without sender, nothing to restart"),
            }
            return;
        }

        let Some(dest) = envelope.first_destination() else {
            warn!(id = %envelope.message_id, "Envelope without destination dropped");
            return;
        };

        if dest.worker == SUPERVISOR {
            self.handle_ack(envelope);
            return;
        }

        self.route(envelope, dest).await;
    }

    /// 完成追踪：回到主管的 completed 信封出表
    fn handle_ack(&mut self, envelope: Envelope) {
        match envelope.status {
            EnvelopeStatus::Completed => {
                let class = self.class_of(envelope.sender.as_deref());
                match self.pending.remove(class.as_deref(), envelope.message_id) {
                    Some(_) => {
                        debug!(id = %envelope.message_id, "Pending envelope acknowledged")
                    }
                    None => debug!(id = %envelope.message_id, "Ack without pending entry"),
                }
            }
            EnvelopeStatus::Failed => {
                // 失败条目留在表里，由类重生重放或人工介入
                warn!(
                    id = %envelope.message_id,
                    sender = ?envelope.sender,
                    reason = ?envelope.reason,
                    "Worker reported failure"
                );
            }
            _ => {}
        }
    }

    /// 路由一个信封到目标工作器类
    async fn route(&mut self, mut envelope: Envelope, dest: Destination) {
        if !self.classes.contains_key(&dest.worker) {
            // 没有类配置：记录后丢弃，已登记的待确认条目留待人工处理
            metrics::counter!("harvest_unknown_destination_total").increment(1);
            warn!(
                worker = %dest.worker,
                id = %envelope.message_id,
                reason = %FailureReason::UnknownDestination,
                "No configuration for destination, dropping"
            );
            return;
        }

        // SERVER_BUSY 拒绝：剔除忙碌实例后按原信封重投
        let excluded = if envelope.reason == Some(FailureReason::ServerBusy) {
            envelope.reason = None;
            envelope.rejected_by.take()
        } else {
            None
        };

        let candidates: Vec<usize> = self
            .roster
            .iter()
            .enumerate()
            .filter(|(_, handle)| {
                handle.class == dest.worker
                    && handle.is_alive()
                    && excluded.as_deref() != Some(handle.worker_name_id.as_str())
            })
            .map(|(index, _)| index)
            .collect();

        // 目的地参数点名实例时优先投回该实例（关联应答路由）
        let chosen = candidates
            .iter()
            .copied()
            .find(|&index| dest.param.as_deref() == Some(self.roster[index].worker_name_id.as_str()))
            .or_else(|| candidates.first().copied());

        let chosen = match chosen {
            Some(index) => index,
            // 没有可用实例就地扩容一个
            None => match self.spawn_instance(&dest.worker) {
                Some(index) => index,
                None => {
                    self.defer(envelope);
                    return;
                }
            },
        };

        self.pending.insert(&dest.worker, &envelope);
        let target = &self.roster[chosen];
        debug!(
            id = %envelope.message_id,
            worker = %target.worker_name_id,
            destination = %dest,
            "Envelope delivered"
        );
        if target.sender.send(envelope).await.is_err() {
            // 收件箱已关闭说明实例刚死亡，看门狗会重生并重放
            warn!(worker = %target.worker_name_id, "Delivery failed, worker inbox closed");
        }
    }

    /// 延迟重投：固定退避后把信封重新塞回主管收件箱
    fn defer(&self, envelope: Envelope) {
        metrics::counter!("harvest_messages_deferred_total").increment(1);
        let backoff = self.defer_policy.calculate_backoff(1);
        warn!(
            id = %envelope.message_id,
            backoff = ?backoff,
            "No live candidate, deferring redelivery"
        );

        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = loopback.send(envelope).await;
        });
    }

    /// 重启指定实例：中止、重生同类实例并重放待确认条目
    async fn restart_worker(&mut self, worker_name_id: &str) {
        let Some(position) = self
            .roster
            .iter()
            .position(|handle| handle.worker_name_id == worker_name_id)
        else {
            warn!(worker = %worker_name_id, "Restart requested for unknown worker");
            return;
        };

        let old = self.roster.swap_remove(position);
        old.join_handle.abort();
        self.health.remove(&old.worker_name_id);
        metrics::counter!("harvest_worker_restarts_total").increment(1);
        warn!(
            class = %old.class,
            worker = %old.worker_name_id,
            "Restarting worker after error envelope"
        );

        let class = old.class.clone();
        match self.spawn_instance(&class) {
            Some(index) => self.replay(&class, index).await,
            None => error!(class = %class, "Failed to respawn worker class"),
        }
    }

    /// 把某类的待确认条目重放给新实例
    async fn replay(&mut self, class: &str, index: usize) {
        let entries = self.pending.class_entries(class);
        if entries.is_empty() {
            return;
        }

        info!(class = %class, count = entries.len(), "Replaying pending envelopes");
        metrics::counter!("harvest_messages_replayed_total").increment(entries.len() as u64);
        let sender = self.roster[index].sender.clone();
        for envelope in entries {
            let _ = sender.send(envelope).await;
        }
    }

    /// 看门狗：清点退出实例并重生，降级过期心跳
    async fn patrol(&mut self) {
        loop {
            let Some(position) = self
                .roster
                .iter()
                .position(|handle| handle.join_handle.is_finished())
            else {
                break;
            };

            let old = self.roster.swap_remove(position);
            self.health.remove(&old.worker_name_id);
            metrics::counter!("harvest_worker_restarts_total").increment(1);
            warn!(
                class = %old.class,
                worker = %old.worker_name_id,
                "Worker exited, respawning"
            );

            let class = old.class.clone();
            match self.spawn_instance(&class) {
                Some(index) => self.replay(&class, index).await,
                None => error!(class = %class, "Failed to respawn worker class"),
            }
        }

        let cutoff = Utc::now() - self.stale_after;
        for health in self.health.values_mut() {
            if health.healthy && health.last_heartbeat < cutoff {
                health.healthy = false;
                warn!(worker = %health.worker_name_id, "Heartbeat stale");
            }
        }
    }

    fn record_heartbeat(&mut self, sender: Option<&str>) {
        let Some(sender) = sender else {
            debug!("Healthy envelope without sender");
            return;
        };

        let entry = self
            .health
            .entry(sender.to_string())
            .or_insert_with(|| WorkerHealth {
                worker_name_id: sender.to_string(),
                last_heartbeat: Utc::now(),
                healthy: true,
            });
        entry.last_heartbeat = Utc::now();
        entry.healthy = true;
    }

    /// 由实例名推断类名：先查花名册，退役实例回退到名字前缀
    fn class_of(&self, sender: Option<&str>) -> Option<String> {
        let sender = sender?;
        self.roster
            .iter()
            .find(|handle| handle.worker_name_id == sender)
            .map(|handle| handle.class.clone())
            .or_else(|| sender.split_once('-').map(|(class, _)| class.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::worker::{spawn_worker, Worker};
    use async_trait::async_trait;
    use serde_json::json;

    /// 把收到的信封转发到捕获通道的测试工作器
    struct EchoWorker {
        name: String,
        class: &'static str,
        captured: mpsc::UnboundedSender<Envelope>,
    }

    #[async_trait]
    impl Worker for EchoWorker {
        async fn run(self: Box<Self>, mut inbox: mpsc::Receiver<Envelope>) {
            while let Some(envelope) = inbox.recv().await {
                let _ = self.captured.send(envelope);
            }
        }

        fn worker_name_id(&self) -> &str {
            &self.name
        }

        fn class(&self) -> &'static str {
            self.class
        }
    }

    struct EchoFactory {
        captured: mpsc::UnboundedSender<Envelope>,
    }

    impl WorkerFactory for EchoFactory {
        fn spawn(
            &self,
            class: &str,
            _config: &WorkerClassSettings,
            _outbox: mpsc::Sender<Envelope>,
        ) -> Option<WorkerHandle> {
            let class_name: &'static str = match class {
                "CrawlWorker" => "CrawlWorker",
                "DBWorker" => "DBWorker",
                _ => return None,
            };
            let name = format!("{}-{}", class, uuid::Uuid::new_v4());
            Some(spawn_worker(
                Box::new(EchoWorker {
                    name,
                    class: class_name,
                    captured: self.captured.clone(),
                }),
                8,
            ))
        }
    }

    fn test_settings() -> SupervisorSettings {
        SupervisorSettings {
            defer_backoff_secs: 0,
            watchdog_interval_secs: 1,
            heartbeat_interval_secs: 10,
            stale_after_secs: 60,
            channel_capacity: 32,
        }
    }

    fn class_config(count: usize) -> WorkerClassSettings {
        WorkerClassSettings {
            count,
            cpu: None,
            memory: None,
        }
    }

    fn supervisor_with_classes(
        classes: &[(&str, usize)],
    ) -> (Supervisor, mpsc::UnboundedReceiver<Envelope>) {
        let (captured_tx, captured_rx) = mpsc::unbounded_channel();
        let factory = Arc::new(EchoFactory {
            captured: captured_tx,
        });
        let classes = classes
            .iter()
            .map(|(name, count)| (name.to_string(), class_config(*count)))
            .collect();
        (
            Supervisor::new(factory, classes, &test_settings()),
            captured_rx,
        )
    }

    #[tokio::test]
    async fn test_route_delivers_and_tracks_pending() {
        let (mut supervisor, mut captured) = supervisor_with_classes(&[("CrawlWorker", 1)]);
        supervisor.start();

        let envelope = Envelope::to("CrawlWorker/crawling", json!({"keyword": "rust"}));
        let message_id = envelope.message_id;
        supervisor.handle_worker_message(envelope).await;

        let delivered = captured.recv().await.unwrap();
        assert_eq!(delivered.message_id, message_id);
        assert_eq!(supervisor.pending.class_len("CrawlWorker"), 1);
    }

    #[tokio::test]
    async fn test_completed_ack_clears_pending() {
        let (mut supervisor, mut captured) = supervisor_with_classes(&[("CrawlWorker", 1)]);
        supervisor.start();
        let worker_name = supervisor.roster[0].worker_name_id.clone();

        let envelope = Envelope::to("CrawlWorker/crawling", json!({}));
        let message_id = envelope.message_id;
        supervisor.handle_worker_message(envelope).await;
        captured.recv().await.unwrap();

        let ack = Envelope::to(SUPERVISOR, serde_json::Value::Null)
            .with_message_id(message_id)
            .with_status(EnvelopeStatus::Completed)
            .with_sender(worker_name);
        supervisor.handle_worker_message(ack).await;

        assert!(supervisor.pending.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_destination_is_dropped() {
        let (mut supervisor, mut captured) = supervisor_with_classes(&[("CrawlWorker", 1)]);
        supervisor.start();

        supervisor
            .handle_worker_message(Envelope::to("GhostWorker/anything", json!({})))
            .await;

        assert!(supervisor.pending.is_empty());
        assert!(captured.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_busy_rejection_spawns_second_instance() {
        let (mut supervisor, mut captured) = supervisor_with_classes(&[("DBWorker", 1)]);
        supervisor.start();
        let busy_worker = supervisor.roster[0].worker_name_id.clone();

        let mut rejection = Envelope::to("DBWorker/get_crawled_data", json!({}));
        rejection.reason = Some(FailureReason::ServerBusy);
        rejection.rejected_by = Some(busy_worker.clone());
        supervisor.handle_worker_message(rejection).await;

        // 忙碌实例被排除，花名册扩容到第二个实例并完成投递
        assert_eq!(supervisor.roster.len(), 2);
        let delivered = captured.recv().await.unwrap();
        assert_eq!(delivered.reason, None);
        assert_ne!(
            supervisor.roster[1].worker_name_id, busy_worker,
            "must not redeliver to the busy instance"
        );
    }

    #[tokio::test]
    async fn test_reply_param_targets_requesting_instance() {
        let (mut supervisor, mut captured) = supervisor_with_classes(&[("CrawlWorker", 2)]);
        supervisor.start();
        let second = supervisor.roster[1].worker_name_id.clone();

        let reply = Envelope::to(
            format!("CrawlWorker/on_fetched_data/{}", second),
            json!({"data": []}),
        );
        supervisor.handle_worker_message(reply).await;

        // 点名实例收到应答；非点名实例不应有流量
        let delivered = captured.recv().await.unwrap();
        assert_eq!(
            delivered.first_destination().unwrap().param.as_deref(),
            Some(second.as_str())
        );
    }

    #[tokio::test]
    async fn test_error_envelope_restarts_sender_and_replays() {
        let (mut supervisor, mut captured) = supervisor_with_classes(&[("CrawlWorker", 1)]);
        supervisor.start();
        let first_name = supervisor.roster[0].worker_name_id.clone();

        // 投递一个任务使其入待确认表
        let job = Envelope::to("CrawlWorker/crawling", json!({"keyword": "rust"}));
        let job_id = job.message_id;
        supervisor.handle_worker_message(job).await;
        captured.recv().await.unwrap();

        // 该实例上报异常
        let error = Envelope::to(SUPERVISOR, serde_json::Value::Null)
            .with_status(EnvelopeStatus::Error)
            .with_sender(first_name.clone());
        supervisor.handle_worker_message(error).await;

        // 原实例出册，新实例收到重放的任务
        assert_eq!(supervisor.roster.len(), 1);
        assert_ne!(supervisor.roster[0].worker_name_id, first_name);
        let replayed = captured.recv().await.unwrap();
        assert_eq!(replayed.message_id, job_id);
        assert_eq!(supervisor.pending.class_len("CrawlWorker"), 1);
    }

    #[tokio::test]
    async fn test_healthy_envelope_refreshes_heartbeat() {
        let (mut supervisor, _captured) = supervisor_with_classes(&[("CrawlWorker", 1)]);
        supervisor.start();
        let worker_name = supervisor.roster[0].worker_name_id.clone();

        let heartbeat = Envelope::to(SUPERVISOR, serde_json::Value::Null)
            .with_status(EnvelopeStatus::Healthy)
            .with_sender(worker_name.clone());
        supervisor.handle_worker_message(heartbeat).await;

        let health = supervisor.health.get(&worker_name).unwrap();
        assert!(health.healthy);
    }

    #[test]
    fn test_class_of_falls_back_to_name_prefix() {
        let (supervisor, _captured) = supervisor_with_classes(&[("CrawlWorker", 0)]);
        assert_eq!(
            supervisor.class_of(Some("DBWorker-123")),
            Some("DBWorker".to_string())
        );
        assert_eq!(supervisor.class_of(None), None);
    }
}
