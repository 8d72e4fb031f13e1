//! 推送客户端
//!
//! `send` 只负责展开成设备消息并入队；后台 worker 攒批，达到批量上限或
//! 到达刷新间隔时把批次交给独立任务发送。关闭时先发完残留批次再返回。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use config::PushConfig;
use domain::{DomainError, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Payload, PushMessage, PushProvider, MAX_BATCH_SIZE};
use crate::error::ApplicationError;
use crate::repository::{DeviceRepository, UnreadRepository};
use crate::tasks::TaskTracker;

struct Batcher {
    provider: Arc<dyn PushProvider>,
    devices: Arc<dyn DeviceRepository>,
    tasks: TaskTracker,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl Batcher {
    fn flush(self: &Arc<Self>, batch: Vec<PushMessage>) {
        let batcher = self.clone();
        self.tasks.spawn(async move {
            let mut batch = batch;
            while !batch.is_empty() {
                let rest = batch.split_off(batch.len().min(MAX_BATCH_SIZE));
                batcher.send_chunk(batch).await;
                batch = rest;
            }
        });
    }

    async fn send_chunk(&self, chunk: Vec<PushMessage>) {
        let tokens: Vec<String> = chunk.iter().map(|m| m.token.clone()).collect();
        let responses = match self.provider.send_batch(chunk).await {
            Ok(responses) => responses,
            Err(err) => {
                self.failed.fetch_add(tokens.len() as u64, Ordering::Relaxed);
                tracing::error!(size = tokens.len(), error = %err, "推送批次请求失败，放弃该批次");
                return;
            }
        };

        let mut invalid = Vec::new();
        for (token, response) in tokens.into_iter().zip(responses) {
            if response.success {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.failed.fetch_add(1, Ordering::Relaxed);
            if response.is_unregistered() {
                invalid.push(token);
            } else {
                tracing::warn!(
                    error_code = response.error_code.as_deref().unwrap_or("unknown"),
                    "推送发送失败"
                );
            }
        }

        if invalid.is_empty() {
            return;
        }
        let count = invalid.len();
        match self.devices.delete_device_tokens(invalid).await {
            Ok(()) => tracing::info!(count, "已删除失效的设备令牌"),
            Err(err) => tracing::error!(count, error = %err, "删除失效设备令牌失败"),
        }
    }
}

pub struct PushClient {
    sender: Mutex<Option<mpsc::UnboundedSender<PushMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    batcher: Arc<Batcher>,
    devices: Arc<dyn DeviceRepository>,
    unreads: Arc<dyn UnreadRepository>,
    message_ttl: Duration,
    body_max_runes: usize,
}

impl PushClient {
    /// 创建客户端并启动后台 worker，需要在 tokio 运行时内调用
    pub fn new(
        provider: Arc<dyn PushProvider>,
        devices: Arc<dyn DeviceRepository>,
        unreads: Arc<dyn UnreadRepository>,
        config: &PushConfig,
    ) -> Self {
        let batcher = Arc::new(Batcher {
            provider,
            devices: devices.clone(),
            tasks: TaskTracker::new(),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            receiver,
            batcher.clone(),
            config.batch_size.max(1),
            config.flush_interval,
        ));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            batcher,
            devices,
            unreads,
            message_ttl: config.message_ttl,
            body_max_runes: config.body_max_runes,
        }
    }

    pub fn body_max_runes(&self) -> usize {
        self.body_max_runes
    }

    /// 向用户的全部设备推送；`with_unread_count` 时附带该用户的未读数作为角标
    pub async fn send(
        &self,
        user_ids: Vec<UserId>,
        payload: &Payload,
        with_unread_count: bool,
    ) -> Result<(), ApplicationError> {
        if self.sender.lock().is_none() {
            return Err(DomainError::AlreadyClosed.into());
        }
        if user_ids.is_empty() {
            return Ok(());
        }

        let devices = self.devices.get_device_tokens(user_ids).await?;
        if devices.is_empty() {
            return Ok(());
        }

        let mut badges: HashMap<UserId, Option<u64>> = HashMap::new();
        if with_unread_count {
            for device in &devices {
                if badges.contains_key(&device.user_id) {
                    continue;
                }
                let count = match self.unreads.get_unread_message_count(device.user_id).await {
                    Ok(count) => Some(count),
                    Err(err) => {
                        tracing::warn!(user_id = %device.user_id, error = %err, "读取未读数失败");
                        None
                    }
                };
                badges.insert(device.user_id, count);
            }
        }

        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(DomainError::AlreadyClosed.into());
        };
        for device in &devices {
            let badge = badges.get(&device.user_id).copied().flatten();
            let message = PushMessage::build(device, payload, badge, self.message_ttl);
            if sender.send(message).is_err() {
                return Err(DomainError::AlreadyClosed.into());
            }
        }
        Ok(())
    }

    /// (成功数, 失败数)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.batcher.succeeded.load(Ordering::Relaxed),
            self.batcher.failed.load(Ordering::Relaxed),
        )
    }

    /// 停止接收新消息，发送残留批次并等待全部请求结束
    pub async fn close(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "推送 worker 异常退出");
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<PushMessage>,
    batcher: Arc<Batcher>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut buffer = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(message) => {
                    buffer.push(message);
                    if buffer.len() >= batch_size {
                        batcher.flush(std::mem::take(&mut buffer));
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    batcher.flush(std::mem::take(&mut buffer));
                }
            }
        }
    }

    if !buffer.is_empty() {
        batcher.flush(buffer);
    }
    batcher.tasks.wait().await;
    tracing::info!("推送 worker 已停止");
}
