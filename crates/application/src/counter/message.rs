//! 消息总数计数

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domain::{DomainResult, HubEvent, Topic};
use tokio::task::JoinHandle;

use super::spawn_listener;
use crate::hub::Hub;
use crate::repository::MessageRepository;

pub struct MessageCounter {
    total: AtomicU64,
}

impl MessageCounter {
    /// 从数据库读取初始值，失败时直接返回错误
    pub async fn init(repo: &dyn MessageRepository) -> DomainResult<Self> {
        let total = repo.count_messages().await?;
        Ok(Self {
            total: AtomicU64::new(total),
        })
    }

    pub fn spawn(self: &Arc<Self>, hub: &Hub, capacity: usize) -> JoinHandle<()> {
        let counter = self.clone();
        spawn_listener(hub, capacity, &[Topic::MessageCreated], move |event| {
            counter.handle(&event)
        })
    }

    pub fn handle(&self, event: &HubEvent) {
        if let HubEvent::MessageCreated { .. } = event {
            self.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
