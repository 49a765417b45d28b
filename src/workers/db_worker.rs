// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::models::date_range::DateRange;
use crate::domain::models::job::keyword_pattern;
use crate::domain::models::tweet::TweetRecord;
use crate::domain::repositories::tweet_repository::TweetRepository;
use crate::messaging::envelope::{Destination, Envelope, EnvelopeStatus, FailureReason, SUPERVISOR};
use crate::utils::errors::WorkerError;
use crate::workers::worker::{ack_envelope, heartbeat_envelope, instance_name, Worker};
use crate::workers::{CRAWL_WORKER, DB_WORKER};
use async_trait::async_trait;

/// 持久化工作器
///
/// 负责爬取记录的无序插入与已爬取范围查询。每个实例同一时刻
/// 只受理一个请求，忙碌期间的请求拒绝回主管重投或扩容。
pub struct DBWorker {
    worker_name_id: String,
    heartbeat_interval: Duration,
    ctx: DbContext,
}

#[derive(Clone)]
struct DbContext {
    worker_name_id: String,
    repository: Arc<dyn TweetRepository>,
    outbox: mpsc::Sender<Envelope>,
    busy: Arc<AtomicBool>,
}

/// 已爬取范围查询参数
#[derive(Debug, Deserialize)]
struct CrawledQuery {
    keyword: String,
    start: String,
    end: String,
}

impl DBWorker {
    /// 创建新的持久化工作器实例
    pub fn new(
        repository: Arc<dyn TweetRepository>,
        outbox: mpsc::Sender<Envelope>,
        heartbeat_interval: Duration,
    ) -> Self {
        let worker_name_id = instance_name(DB_WORKER);
        Self {
            ctx: DbContext {
                worker_name_id: worker_name_id.clone(),
                repository,
                outbox,
                busy: Arc::new(AtomicBool::new(false)),
            },
            worker_name_id,
            heartbeat_interval,
        }
    }

    async fn handle_envelope(&self, mut envelope: Envelope) {
        let Some(dest) = envelope.first_destination() else {
            warn!(worker = %self.worker_name_id, "Envelope without destination");
            return;
        };

        match dest.method.as_deref() {
            Some("create_new_data") | Some("get_crawled_data") => {
                if self.ctx.busy.load(Ordering::SeqCst) {
                    metrics::counter!("harvest_busy_rejections_total").increment(1);
                    debug!(worker = %self.worker_name_id, id = %envelope.message_id, "Busy, rejecting request");
                    envelope.reason = Some(FailureReason::ServerBusy);
                    envelope.rejected_by = Some(self.worker_name_id.clone());
                    let _ = self.ctx.outbox.send(envelope).await;
                    return;
                }

                self.ctx.busy.store(true, Ordering::SeqCst);
                let ctx = self.ctx.clone();
                tokio::spawn(async move {
                    ctx.execute(envelope, dest).await;
                });
            }
            other => {
                warn!(worker = %self.worker_name_id, method = ?other, "Unsupported method");
            }
        }
    }
}

#[async_trait]
impl Worker for DBWorker {
    async fn run(self: Box<Self>, mut inbox: mpsc::Receiver<Envelope>) {
        info!(worker = %self.worker_name_id, "DB worker started");

        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = inbox.recv() => match maybe {
                    Some(envelope) => self.handle_envelope(envelope).await,
                    None => break,
                },
                _ = heartbeat.tick() => {
                    let _ = self.ctx.outbox.send(heartbeat_envelope(&self.worker_name_id)).await;
                }
            }
        }

        info!(worker = %self.worker_name_id, "DB worker inbox closed, stopping");
    }

    fn worker_name_id(&self) -> &str {
        &self.worker_name_id
    }

    fn class(&self) -> &'static str {
        DB_WORKER
    }
}

impl DbContext {
    async fn execute(self, envelope: Envelope, dest: Destination) {
        let message_id = envelope.message_id;
        let result = match dest.method.as_deref() {
            Some("create_new_data") => self.create_new_data(&envelope, dest.param.as_deref()).await,
            Some("get_crawled_data") => self.get_crawled_data(&envelope).await,
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                let _ = self
                    .outbox
                    .send(ack_envelope(message_id, &self.worker_name_id))
                    .await;
            }
            Err(e) => {
                warn!(worker = %self.worker_name_id, id = %message_id, error = %e, "Request failed");
                let failure = Envelope::to(SUPERVISOR, envelope.data.clone())
                    .with_message_id(message_id)
                    .with_status(EnvelopeStatus::Failed)
                    .with_reason(e.reason())
                    .with_sender(&self.worker_name_id);
                let _ = self.outbox.send(failure).await;
            }
        }

        self.busy.store(false, Ordering::SeqCst);
    }

    /// 无序批量插入，容忍重复；空数据为无操作
    async fn create_new_data(
        &self,
        envelope: &Envelope,
        project_id: Option<&str>,
    ) -> Result<(), WorkerError> {
        let records: Vec<TweetRecord> = serde_json::from_value(envelope.data.clone())
            .map_err(|e| WorkerError::BadInput(format!("undecodable records: {}", e)))?;

        let inserted = if records.is_empty() {
            debug!(worker = %self.worker_name_id, "Empty insert, nothing to do");
            Vec::new()
        } else {
            self.repository
                .insert_many(&records)
                .await
                .map_err(|e| WorkerError::Transport(e.to_string()))?
        };
        metrics::counter!("harvest_tweets_persisted_total").increment(inserted.len() as u64);
        info!(
            worker = %self.worker_name_id,
            received = records.len(),
            inserted = inserted.len(),
            "Records persisted"
        );

        let notify = Envelope::to(
            format!(
                "BrokerGateway/produce_data/{}",
                project_id.unwrap_or_default()
            ),
            json!({ "inserted_ids": inserted }),
        )
        .with_status(EnvelopeStatus::Completed)
        .with_sender(&self.worker_name_id);
        self.outbox
            .send(notify)
            .await
            .map_err(|_| WorkerError::Transport("supervisor channel closed".into()))
    }

    /// 按关键词正则与创建日期窗口查询，应答路由回请求实例
    async fn get_crawled_data(&self, envelope: &Envelope) -> Result<(), WorkerError> {
        let query: CrawledQuery = serde_json::from_value(envelope.data.clone())
            .map_err(|e| WorkerError::BadInput(format!("undecodable query: {}", e)))?;
        let window = DateRange::parse(&query.start, &query.end)
            .map_err(|e| WorkerError::BadInput(format!("bad query window: {}", e)))?;
        let pattern = keyword_pattern(&query.keyword);

        let found = self
            .repository
            .find_in_window(&pattern, &window)
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        debug!(
            worker = %self.worker_name_id,
            keyword = %query.keyword,
            found = found.len(),
            "Crawled-data query served"
        );

        // 应答带上请求实例名，主管优先投回请求方
        let destination = match envelope.sender.as_deref() {
            Some(requester) => format!("{}/on_fetched_data/{}", CRAWL_WORKER, requester),
            None => format!("{}/on_fetched_data", CRAWL_WORKER),
        };
        let reply = Envelope::to(destination, json!({ "data": found }))
            .with_message_id(envelope.message_id)
            .with_status(EnvelopeStatus::Completed)
            .with_sender(&self.worker_name_id);
        self.outbox
            .send(reply)
            .await
            .map_err(|_| WorkerError::Transport("supervisor channel closed".into()))
    }
}
