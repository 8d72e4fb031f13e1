//! 在线用户计数
//!
//! 按用户统计 WebSocket 与 SSE 连接数，0 和 1 之间跨越时发布上线、下线事件。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use domain::{HubEvent, Topic, UserId};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::spawn_listener;
use crate::hub::Hub;

const TOPICS: &[Topic] = &[
    Topic::WsConnected,
    Topic::WsDisconnected,
    Topic::SseConnected,
    Topic::SseDisconnected,
];

pub struct OnlineCounter {
    connections: Mutex<HashMap<UserId, usize>>,
    hub: Arc<Hub>,
}

impl OnlineCounter {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            hub,
        }
    }

    pub fn spawn(self: &Arc<Self>, capacity: usize) -> JoinHandle<()> {
        let counter = self.clone();
        spawn_listener(&self.hub, capacity, TOPICS, move |event| counter.handle(&event))
    }

    pub fn handle(&self, event: &HubEvent) {
        match event {
            HubEvent::WsConnected { user_id } | HubEvent::SseConnected { user_id } => {
                self.increment(*user_id)
            }
            HubEvent::WsDisconnected { user_id } | HubEvent::SseDisconnected { user_id } => {
                self.decrement(*user_id)
            }
            _ => {}
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.connections.lock().contains_key(&user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.connections.lock().keys().copied().collect()
    }

    pub fn online_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn increment(&self, user_id: UserId) {
        let mut connections = self.connections.lock();
        let count = connections.entry(user_id).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.hub.publish(HubEvent::UserOnline { user_id });
        }
    }

    fn decrement(&self, user_id: UserId) {
        let mut connections = self.connections.lock();
        let Some(count) = connections.get_mut(&user_id) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            connections.remove(&user_id);
            self.hub.publish(HubEvent::UserOffline {
                user_id,
                datetime: Utc::now(),
            });
        }
    }
}
