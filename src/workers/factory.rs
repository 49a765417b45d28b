// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::settings::{BrokerSettings, CrawlSettings, WorkerClassSettings};
use crate::domain::repositories::tweet_repository::TweetRepository;
use crate::domain::services::lock_service::CrawlLockManager;
use crate::engines::traits::CrawlEngine;
use crate::infrastructure::broker::transport::BrokerTransport;
use crate::messaging::envelope::Envelope;
use crate::workers::broker_gateway::BrokerGateway;
use crate::workers::crawl_worker::CrawlWorker;
use crate::workers::db_worker::DBWorker;
use crate::workers::worker::{spawn_worker, Worker, WorkerHandle};
use crate::workers::{BROKER_GATEWAY, CRAWL_WORKER, DB_WORKER};

/// 工作器工厂特质
///
/// 主管按类名委托工厂构建并启动实例。没有对应类的返回 `None`。
pub trait WorkerFactory: Send + Sync {
    fn spawn(
        &self,
        class: &str,
        config: &WorkerClassSettings,
        outbox: mpsc::Sender<Envelope>,
    ) -> Option<WorkerHandle>;
}

/// 流水线工作器工厂
///
/// 持有三类工作器的全部依赖并按类名装配
pub struct PipelineWorkerFactory {
    locks: Arc<CrawlLockManager>,
    repository: Arc<dyn TweetRepository>,
    engine: Arc<dyn CrawlEngine>,
    transport: Arc<dyn BrokerTransport>,
    broker: BrokerSettings,
    crawl: CrawlSettings,
    heartbeat_interval: Duration,
    channel_capacity: usize,
}

impl PipelineWorkerFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        locks: Arc<CrawlLockManager>,
        repository: Arc<dyn TweetRepository>,
        engine: Arc<dyn CrawlEngine>,
        transport: Arc<dyn BrokerTransport>,
        broker: BrokerSettings,
        crawl: CrawlSettings,
        heartbeat_interval: Duration,
        channel_capacity: usize,
    ) -> Self {
        Self {
            locks,
            repository,
            engine,
            transport,
            broker,
            crawl,
            heartbeat_interval,
            channel_capacity,
        }
    }
}

impl WorkerFactory for PipelineWorkerFactory {
    fn spawn(
        &self,
        class: &str,
        _config: &WorkerClassSettings,
        outbox: mpsc::Sender<Envelope>,
    ) -> Option<WorkerHandle> {
        let worker: Box<dyn Worker> = match class {
            CRAWL_WORKER => Box::new(CrawlWorker::new(
                self.locks.clone(),
                self.engine.clone(),
                outbox,
                self.crawl.target_count,
                self.crawl.request_timeout(),
                self.heartbeat_interval,
            )),
            DB_WORKER => Box::new(DBWorker::new(
                self.repository.clone(),
                outbox,
                self.heartbeat_interval,
            )),
            BROKER_GATEWAY => Box::new(BrokerGateway::new(
                self.transport.clone(),
                self.broker.clone(),
                outbox,
                self.heartbeat_interval,
            )),
            _ => return None,
        };

        Some(spawn_worker(worker, self.channel_capacity))
    }
}
