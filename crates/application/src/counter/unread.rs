//! 未读消息计数
//!
//! 总量随未读写入增加，随已读和删除减少；`get_changes` 返回上次重置以来的增量。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use domain::{HubEvent, Topic};
use tokio::task::JoinHandle;

use super::spawn_listener;
use crate::hub::Hub;

const TOPICS: &[Topic] = &[Topic::MessageUnread, Topic::ChannelRead, Topic::MessageDeleted];

#[derive(Default)]
pub struct UnreadMessageCounter {
    total: AtomicI64,
    changes: AtomicI64,
}

impl UnreadMessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(self: &Arc<Self>, hub: &Hub, capacity: usize) -> JoinHandle<()> {
        let counter = self.clone();
        spawn_listener(hub, capacity, TOPICS, move |event| counter.handle(&event))
    }

    pub fn handle(&self, event: &HubEvent) {
        match event {
            HubEvent::MessageUnread { .. } => self.add(1),
            HubEvent::ChannelRead {
                read_messages_num, ..
            } => self.add(-(*read_messages_num as i64)),
            HubEvent::MessageDeleted {
                deleted_unreads, ..
            } => self.add(-(deleted_unreads.len() as i64)),
            _ => {}
        }
    }

    pub fn get(&self) -> i64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn get_changes(&self, reset: bool) -> i64 {
        if reset {
            self.changes.swap(0, Ordering::Relaxed)
        } else {
            self.changes.load(Ordering::Relaxed)
        }
    }

    fn add(&self, delta: i64) {
        self.total.fetch_add(delta, Ordering::Relaxed);
        self.changes.fetch_add(delta, Ordering::Relaxed);
    }
}
