// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::messaging::envelope::{Envelope, EnvelopeStatus, SUPERVISOR};

/// Worker trait定义
///
/// 所有由主管托管的工作器都必须实现此trait。`run` 消费收件箱
/// 直至通道关闭；工作器退出后由主管看门狗重生。
#[async_trait]
pub trait Worker: Send + 'static {
    /// 运行工作器主循环
    async fn run(self: Box<Self>, inbox: mpsc::Receiver<Envelope>);

    /// 获取工作器实例名
    fn worker_name_id(&self) -> &str;

    /// 获取工作器类名
    fn class(&self) -> &'static str;
}

/// 子工作器句柄
///
/// 主管花名册中的一项：实例名、类名、收件箱发送端与任务句柄
pub struct WorkerHandle {
    /// 实例名 `<Class>-<uuid>`
    pub worker_name_id: String,
    /// 类名
    pub class: String,
    /// 通往该实例收件箱的发送端
    pub sender: mpsc::Sender<Envelope>,
    /// 底层任务句柄
    pub join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// 存活判定：任务尚未结束
    pub fn is_alive(&self) -> bool {
        !self.join_handle.is_finished()
    }
}

/// 生成实例名
pub fn instance_name(class: &str) -> String {
    format!("{}-{}", class, Uuid::new_v4())
}

/// 把工作器装上通道并启动
pub fn spawn_worker(worker: Box<dyn Worker>, capacity: usize) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(capacity);
    let worker_name_id = worker.worker_name_id().to_string();
    let class = worker.class().to_string();
    let join_handle = tokio::spawn(worker.run(rx));

    WorkerHandle {
        worker_name_id,
        class,
        sender: tx,
        join_handle,
    }
}

/// 心跳信封
pub fn heartbeat_envelope(sender: &str) -> Envelope {
    Envelope::to(SUPERVISOR, Value::Null)
        .with_status(EnvelopeStatus::Healthy)
        .with_sender(sender)
}

/// 完成确认信封，复用被处理消息的ID
pub fn ack_envelope(message_id: Uuid, sender: &str) -> Envelope {
    Envelope::to(SUPERVISOR, Value::Null)
        .with_message_id(message_id)
        .with_status(EnvelopeStatus::Completed)
        .with_sender(sender)
}

/// 异常信封，触发主管重启发送者
pub fn error_envelope(sender: &str, detail: &str) -> Envelope {
    Envelope::to(SUPERVISOR, json!({ "detail": detail }))
        .with_status(EnvelopeStatus::Error)
        .with_sender(sender)
}
