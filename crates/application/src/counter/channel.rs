//! 频道总数计数

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domain::{DomainResult, HubEvent, Topic};
use tokio::task::JoinHandle;

use super::spawn_listener;
use crate::hub::Hub;
use crate::repository::ChannelRepository;

pub struct ChannelCounter {
    total: AtomicU64,
}

impl ChannelCounter {
    pub async fn init(repo: &dyn ChannelRepository) -> DomainResult<Self> {
        let total = repo.count_channels().await?;
        Ok(Self {
            total: AtomicU64::new(total),
        })
    }

    pub fn spawn(self: &Arc<Self>, hub: &Hub, capacity: usize) -> JoinHandle<()> {
        let counter = self.clone();
        spawn_listener(
            hub,
            capacity,
            &[Topic::ChannelCreated, Topic::ChannelDeleted],
            move |event| counter.handle(&event),
        )
    }

    pub fn handle(&self, event: &HubEvent) {
        match event {
            HubEvent::ChannelCreated { .. } => {
                self.total.fetch_add(1, Ordering::Relaxed);
            }
            HubEvent::ChannelDeleted { .. } => {
                let _ = self
                    .total
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                        Some(v.saturating_sub(1))
                    });
            }
            _ => {}
        }
    }

    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
