// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use harvestrs::config::settings::Settings;
use harvestrs::domain::repositories::range_lock_store::RangeLockStore;
use harvestrs::domain::services::lock_service::CrawlLockManager;
use harvestrs::engines::null_engine::NullEngine;
use harvestrs::infrastructure::broker::transport::MemoryBrokerTransport;
use harvestrs::infrastructure::cache::redis_client::RedisClient;
use harvestrs::infrastructure::locks::memory_lock_store::MemoryRangeLockStore;
use harvestrs::infrastructure::locks::redis_lock_store::RedisRangeLockStore;
use harvestrs::infrastructure::repositories::memory_tweet_repo::MemoryTweetRepository;
use harvestrs::utils::telemetry;
use harvestrs::workers::factory::PipelineWorkerFactory;
use harvestrs::workers::supervisor::Supervisor;
use harvestrs::workers::{BROKER_GATEWAY, CRAWL_WORKER, DB_WORKER};
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // 1. 初始化日志和遥测系统
    telemetry::init_telemetry();
    info!("Starting harvestrs...");

    // 初始化 Prometheus 指标收集
    harvestrs::infrastructure::metrics::init_metrics();

    // 2. 加载应用程序配置
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Configuration loaded");

    // 3. 接入范围锁存储，未配置Redis时退回进程内实现
    let lock_store: Arc<dyn RangeLockStore> = if settings.redis.url.is_empty() {
        info!("No redis URL configured, using in-process lock store");
        Arc::new(MemoryRangeLockStore::new())
    } else {
        match RedisClient::new(&settings.redis.effective_url()).await {
            Ok(client) => {
                info!("Redis lock store initialized");
                Arc::new(RedisRangeLockStore::new(client))
            }
            Err(e) => {
                error!("Failed to initialize redis client: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };
    let locks = Arc::new(CrawlLockManager::new(
        lock_store,
        settings.locks.namespace.clone(),
        settings.locks.ttl_seconds,
    ));

    // 4. 文档存储与代理客户端是外部协作者，这里装配进程内实现；
    //    爬取驱动未接入时使用空引擎
    let repository = Arc::new(MemoryTweetRepository::new());
    let transport = Arc::new(MemoryBrokerTransport::new());
    let engine = Arc::new(NullEngine::new());
    info!(
        database = %settings.database.url,
        collection = %settings.database.collection,
        broker = %settings.broker.url,
        "External collaborators configured (in-process defaults in this build)"
    );

    // 5. 装配工作器工厂与主管
    let factory = Arc::new(PipelineWorkerFactory::new(
        locks,
        repository,
        engine,
        transport,
        settings.broker.clone(),
        settings.crawl.clone(),
        settings.supervisor.heartbeat_interval(),
        settings.supervisor.channel_capacity,
    ));

    let classes = HashMap::from([
        (
            CRAWL_WORKER.to_string(),
            settings.workers.crawl_worker.clone(),
        ),
        (DB_WORKER.to_string(), settings.workers.db_worker.clone()),
        (
            BROKER_GATEWAY.to_string(),
            settings.workers.broker_gateway.clone(),
        ),
    ]);
    let supervisor = Supervisor::new(factory, classes, &settings.supervisor);

    // 6. 运行主管直至收到关闭信号
    let supervisor_handle = tokio::spawn(supervisor.run());

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
    }

    info!("Shutting down workers...");
    supervisor_handle.abort();
    info!("Workers shut down successfully");

    ExitCode::SUCCESS
}
