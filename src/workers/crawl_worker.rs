// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::models::date_range::DateRange;
use crate::domain::models::job::Job;
use crate::domain::models::tweet::TweetRecord;
use crate::domain::services::lock_service::CrawlLockManager;
use crate::engines::traits::CrawlEngine;
use crate::messaging::bus::{self, Correlations};
use crate::messaging::envelope::{Envelope, EnvelopeStatus, FailureReason, SUPERVISOR};
use crate::utils::errors::WorkerError;
use crate::workers::worker::{ack_envelope, heartbeat_envelope, instance_name, Worker};
use crate::workers::{CRAWL_WORKER, DB_WORKER};
use async_trait::async_trait;

/// 单个任务的执行结果
enum JobOutcome {
    /// 正常完成，产出若干记录
    Completed { records: usize },
    /// 请求窗口已被既有记录完全覆盖，短路返回
    ShortCircuit,
    /// 实际爬取过但整个任务没有产出记录
    Empty,
}

/// 爬取工作器
///
/// 端到端执行单个任务：查询既有覆盖、计算残差子区间、逐段
/// 加锁-爬取-释放、过滤累积结果并交给DBWorker持久化。每个实例
/// 同一时刻只处理一个任务，忙碌期间的新任务拒绝回主管重投。
pub struct CrawlWorker {
    worker_name_id: String,
    heartbeat_interval: Duration,
    ctx: JobContext,
}

/// 任务执行上下文
///
/// 可克隆进内层任务，保持主循环对拒绝、关联应答与心跳的响应
#[derive(Clone)]
struct JobContext {
    worker_name_id: String,
    locks: Arc<CrawlLockManager>,
    engine: Arc<dyn CrawlEngine>,
    outbox: mpsc::Sender<Envelope>,
    busy: Arc<AtomicBool>,
    correlations: Arc<Correlations>,
    request_timeout: Duration,
    target_count: usize,
}

impl CrawlWorker {
    /// 创建新的爬取工作器实例
    ///
    /// # 参数
    ///
    /// * `locks` - 范围锁管理器
    /// * `engine` - 外部爬取引擎
    /// * `outbox` - 通往主管的信封发送端
    /// * `target_count` - 每个子区间的目标记录数
    /// * `request_timeout` - DBWorker往返超时
    /// * `heartbeat_interval` - 心跳间隔
    pub fn new(
        locks: Arc<CrawlLockManager>,
        engine: Arc<dyn CrawlEngine>,
        outbox: mpsc::Sender<Envelope>,
        target_count: usize,
        request_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let worker_name_id = instance_name(CRAWL_WORKER);
        Self {
            ctx: JobContext {
                worker_name_id: worker_name_id.clone(),
                locks,
                engine,
                outbox,
                busy: Arc::new(AtomicBool::new(false)),
                correlations: Arc::new(Correlations::new()),
                request_timeout,
                target_count,
            },
            worker_name_id,
            heartbeat_interval,
        }
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        let Some(dest) = envelope.first_destination() else {
            warn!(worker = %self.worker_name_id, "Envelope without destination");
            return;
        };

        match dest.method.as_deref() {
            Some("crawling") => self.start_job(envelope).await,
            Some("on_fetched_data") => {
                let message_id = envelope.message_id;
                if !self.ctx.correlations.complete(envelope) {
                    debug!(worker = %self.worker_name_id, %message_id, "Stale fetched-data reply");
                }
                // 应答经主管路由也计入待确认表，处理后即确认
                let _ = self
                    .ctx
                    .outbox
                    .send(ack_envelope(message_id, &self.worker_name_id))
                    .await;
            }
            other => {
                warn!(worker = %self.worker_name_id, method = ?other, "Unsupported method");
            }
        }
    }

    async fn start_job(&self, mut envelope: Envelope) {
        if self.ctx.busy.load(Ordering::SeqCst) {
            metrics::counter!("harvest_busy_rejections_total").increment(1);
            debug!(worker = %self.worker_name_id, id = %envelope.message_id, "Busy, rejecting job");
            envelope.reason = Some(FailureReason::ServerBusy);
            envelope.rejected_by = Some(self.worker_name_id.clone());
            let _ = self.ctx.outbox.send(envelope).await;
            return;
        }

        self.ctx.busy.store(true, Ordering::SeqCst);
        let ctx = self.ctx.clone();
        // 任务在内层任务上推进，主循环继续接收拒绝与关联应答
        tokio::spawn(async move {
            ctx.execute(envelope).await;
        });
    }
}

#[async_trait]
impl Worker for CrawlWorker {
    async fn run(self: Box<Self>, mut inbox: mpsc::Receiver<Envelope>) {
        info!(worker = %self.worker_name_id, "Crawl worker started");

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

        info!(worker = %self.worker_name_id, "Crawl worker inbox closed, stopping");
    }

    fn worker_name_id(&self) -> &str {
        &self.worker_name_id
    }

    fn class(&self) -> &'static str {
        CRAWL_WORKER
    }
}

impl JobContext {
    async fn execute(self, envelope: Envelope) {
        metrics::counter!("harvest_jobs_received_total").increment(1);
        let message_id = envelope.message_id;

        let outcome = match Job::from_payload(&envelope.data) {
            Ok(job) => self.run_job(&job).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(JobOutcome::Completed { records }) => {
                info!(worker = %self.worker_name_id, id = %message_id, records, "Job completed");
                metrics::counter!("harvest_jobs_completed_total").increment(1);
                let _ = self
                    .outbox
                    .send(ack_envelope(message_id, &self.worker_name_id))
                    .await;
            }
            Ok(JobOutcome::ShortCircuit) => {
                info!(worker = %self.worker_name_id, id = %message_id, "Window already covered, completing with empty data");
                metrics::counter!("harvest_jobs_completed_total").increment(1);
                let _ = self
                    .outbox
                    .send(ack_envelope(message_id, &self.worker_name_id))
                    .await;
            }
            Ok(JobOutcome::Empty) => {
                info!(worker = %self.worker_name_id, id = %message_id, "Job ended without records");
                metrics::counter!("harvest_jobs_completed_total").increment(1);
                let _ = self
                    .outbox
                    .send(ack_envelope(message_id, &self.worker_name_id))
                    .await;
            }
            Err(e) => {
                warn!(worker = %self.worker_name_id, id = %message_id, error = %e, "Job failed");
                metrics::counter!("harvest_jobs_failed_total").increment(1);
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

    async fn run_job(&self, job: &Job) -> Result<JobOutcome, WorkerError> {
        // 1. 查询既有覆盖
        let existing = self.fetch_crawled(job).await?;
        let covered = coverage(&existing);

        // 2. 覆盖恰好等于请求窗口时短路
        if covered.as_ref() == Some(&job.range) {
            return Ok(JobOutcome::ShortCircuit);
        }

        // 3. 计算残差子区间
        let mut overlaps = self
            .locks
            .overlap(&job.keyword, &job.range)
            .await
            .map_err(|e| WorkerError::Transport(e.to_string()))?;
        if let Some(covered) = covered {
            overlaps.push(covered);
        }
        let residuals = CrawlLockManager::subtract(&job.range, &overlaps);
        debug!(
            worker = %self.worker_name_id,
            keyword = %job.keyword,
            residuals = residuals.len(),
            "Residual sub-ranges planned"
        );

        // 4. 逐段加锁-爬取-释放，严格串行
        let pattern = job.keyword_pattern();
        let mut accumulator: Vec<TweetRecord> = Vec::new();
        let mut attempted = false;

        for residual in &residuals {
            let acquired = self
                .locks
                .acquire_range(&job.keyword, residual)
                .await
                .map_err(|e| WorkerError::Transport(e.to_string()))?;
            if !acquired {
                debug!(worker = %self.worker_name_id, range = %residual, "Sub-range locked elsewhere, skipping");
                continue;
            }

            attempted = true;
            match self
                .engine
                .crawl(&job.access_token, &job.keyword, residual, self.target_count)
                .await
            {
                Ok(records) => {
                    let total = records.len();
                    let kept: Vec<TweetRecord> = records
                        .into_iter()
                        .filter(|record| pattern.is_match(&record.full_text))
                        .collect();
                    if kept.is_empty() {
                        info!(
                            worker = %self.worker_name_id,
                            range = %residual,
                            reason = %FailureReason::NoTweetFound,
                            "No tweets found for sub-range"
                        );
                    }
                    debug!(worker = %self.worker_name_id, range = %residual, total, kept = kept.len(), "Sub-range crawled");
                    accumulator.extend(kept);
                }
                Err(e) => {
                    // 单段失败不拖垮整个任务，释放后继续下一段
                    metrics::counter!("harvest_crawl_failures_total").increment(1);
                    warn!(
                        worker = %self.worker_name_id,
                        range = %residual,
                        reason = %FailureReason::CrawlFailed,
                        error = %e,
                        "Crawl failed, continuing with next sub-range"
                    );
                }
            }

            // 无论爬取结果如何都释放
            self.locks
                .release_range(&job.keyword, residual)
                .await
                .map_err(|e| WorkerError::Transport(e.to_string()))?;
        }

        // 5. 队列排空后的产出
        if attempted && accumulator.is_empty() {
            let compensation = Envelope::to(
                format!("BrokerGateway/produce_data/{}", job.project_id),
                job.summary(),
            )
            .with_status(EnvelopeStatus::Failed)
            .with_reason(FailureReason::NoTweetFound)
            .with_sender(&self.worker_name_id);
            self.outbox
                .send(compensation)
                .await
                .map_err(|_| WorkerError::Transport("supervisor channel closed".into()))?;
            return Ok(JobOutcome::Empty);
        }

        let records = accumulator.len();
        let persist = Envelope::to(
            format!("DBWorker/create_new_data/{}", job.project_id),
            serde_json::to_value(&accumulator)
                .map_err(|e| WorkerError::Internal(e.to_string()))?,
        )
        .with_status(EnvelopeStatus::Completed)
        .with_sender(&self.worker_name_id);
        self.outbox
            .send(persist)
            .await
            .map_err(|_| WorkerError::Transport("supervisor channel closed".into()))?;

        // 回读覆盖情况后发布下游通知
        let _ = self.fetch_crawled(job).await?;
        let produce = Envelope::to(
            format!("BrokerGateway/produce_data/{}", job.project_id),
            job.summary(),
        )
        .with_status(EnvelopeStatus::Completed)
        .with_sender(&self.worker_name_id);
        self.outbox
            .send(produce)
            .await
            .map_err(|_| WorkerError::Transport("supervisor channel closed".into()))?;

        Ok(JobOutcome::Completed { records })
    }

    /// 向DBWorker发起覆盖查询并等待关联应答
    async fn fetch_crawled(&self, job: &Job) -> Result<Vec<TweetRecord>, WorkerError> {
        let request = Envelope::to(
            format!("{}/get_crawled_data", DB_WORKER),
            json!({
                "keyword": job.keyword,
                "start": job.range.start(),
                "end": job.range.end(),
            }),
        )
        .with_sender(&self.worker_name_id);

        let reply = bus::request(
            &self.outbox,
            &self.correlations,
            request,
            self.request_timeout,
        )
        .await
        .map_err(|e| WorkerError::Transport(e.to_string()))?;

        if reply.status != EnvelopeStatus::Completed {
            return Err(WorkerError::Transport(format!(
                "crawled-data query failed: {:?}",
                reply.reason
            )));
        }

        let data = reply
            .data
            .get("data")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(data).map_err(|e| WorkerError::Internal(e.to_string()))
    }
}

/// 从既有记录推导覆盖范围（创建日的最小值到最大值）
fn coverage(records: &[TweetRecord]) -> Option<DateRange> {
    let days: Vec<_> = records
        .iter()
        .filter_map(TweetRecord::created_date)
        .collect();
    let start = days.iter().min()?;
    let end = days.iter().max()?;
    DateRange::new(*start, *end).ok()
}
