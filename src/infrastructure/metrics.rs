// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// 指标导出端口
const METRICS_ADDR: &str = "0.0.0.0:9000";

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let addr: SocketAddr = METRICS_ADDR.parse().expect("Invalid metrics address");

    // Start the exporter
    // Ignore error if address is already in use (for development/testing)
    if let Err(e) = builder.with_http_listener(addr).install() {
        tracing::warn!("Failed to install Prometheus recorder: {}. This might happen if the port is already in use.", e);
        return;
    }

    describe_counter!("harvest_jobs_consumed_total", "入站队列消费的任务数");
    describe_counter!("harvest_jobs_received_total", "爬取工作器受理的任务数");
    describe_counter!("harvest_jobs_completed_total", "完成的任务数");
    describe_counter!("harvest_jobs_failed_total", "失败的任务数");
    describe_counter!("harvest_busy_rejections_total", "忙碌拒绝次数");
    describe_counter!("harvest_locks_acquired_total", "成功获取的范围锁数");
    describe_counter!("harvest_lock_contention_total", "范围锁竞争次数");
    describe_counter!("harvest_crawl_failures_total", "子区间爬取失败次数");
    describe_counter!("harvest_tweets_persisted_total", "持久化的推文记录数");
    describe_counter!("harvest_messages_routed_total", "主管路由的信封数");
    describe_counter!("harvest_messages_deferred_total", "延迟重投的信封数");
    describe_counter!("harvest_messages_replayed_total", "重放的信封数");
    describe_counter!("harvest_messages_published_total", "发布到出站队列的消息数");
    describe_counter!("harvest_unknown_destination_total", "无类配置的目的地数");
    describe_counter!("harvest_workers_spawned_total", "启动的工作器实例数");
    describe_counter!("harvest_worker_restarts_total", "工作器重启次数");

    info!("Metrics exporter listening on {}", addr);
}
