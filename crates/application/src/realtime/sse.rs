//! Server-Sent Events 推送
//!
//! 每个连接一个有界队列，按用户登记；队列满时丢弃事件。
//! [`SseSubscription`] 被 drop 时自动注销。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{DomainError, DomainResult, HubEvent, UserId};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::hub::Hub;

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: Value,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Default)]
struct Registry {
    closed: bool,
    clients: HashMap<UserId, HashMap<Uuid, mpsc::Sender<SseEvent>>>,
}

struct Shared {
    hub: Arc<Hub>,
    registry: RwLock<Registry>,
}

impl Shared {
    fn remove(&self, user_id: UserId, connection_id: Uuid) {
        let removed = {
            let mut registry = self.registry.write();
            let removed = registry
                .clients
                .get_mut(&user_id)
                .and_then(|conns| conns.remove(&connection_id))
                .is_some();
            if registry.clients.get(&user_id).is_some_and(HashMap::is_empty) {
                registry.clients.remove(&user_id);
            }
            removed
        };
        if removed {
            self.hub.publish(HubEvent::SseDisconnected { user_id });
            tracing::info!(user_id = %user_id, "SSE 连接已关闭");
        }
    }
}

#[derive(Clone)]
pub struct SseStreamer {
    shared: Arc<Shared>,
    buffer_size: usize,
}

/// 单个 SSE 连接的接收端
pub struct SseSubscription {
    user_id: UserId,
    connection_id: Uuid,
    receiver: mpsc::Receiver<SseEvent>,
    shared: Arc<Shared>,
}

impl SseSubscription {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// streamer 关闭后返回 `None`
    pub async fn recv(&mut self) -> Option<SseEvent> {
        self.receiver.recv().await
    }
}

impl Drop for SseSubscription {
    fn drop(&mut self) {
        self.shared.remove(self.user_id, self.connection_id);
    }
}

impl SseStreamer {
    pub fn new(hub: Arc<Hub>, buffer_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                hub,
                registry: RwLock::new(Registry::default()),
            }),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn subscribe(&self, user_id: UserId) -> DomainResult<SseSubscription> {
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let connection_id = Uuid::new_v4();
        {
            let mut registry = self.shared.registry.write();
            if registry.closed {
                return Err(DomainError::AlreadyClosed);
            }
            registry
                .clients
                .entry(user_id)
                .or_default()
                .insert(connection_id, sender);
        }
        self.shared.hub.publish(HubEvent::SseConnected { user_id });
        tracing::info!(user_id = %user_id, "SSE 连接已建立");
        Ok(SseSubscription {
            user_id,
            connection_id,
            receiver,
            shared: self.shared.clone(),
        })
    }

    pub fn broadcast(&self, event: &SseEvent) {
        let registry = self.shared.registry.read();
        for (user_id, conns) in &registry.clients {
            deliver(*user_id, conns, event);
        }
    }

    pub fn multicast(&self, user_id: UserId, event: &SseEvent) {
        let registry = self.shared.registry.read();
        if let Some(conns) = registry.clients.get(&user_id) {
            deliver(user_id, conns, event);
        }
    }

    /// 关闭全部连接的发送端，接收方随即读到流结束。
    /// 每个被清掉的连接各发一次断开事件，之后的 drop 不再重复发布。
    pub fn shutdown(&self) {
        let cleared: Vec<UserId> = {
            let mut registry = self.shared.registry.write();
            registry.closed = true;
            registry
                .clients
                .drain()
                .flat_map(|(user_id, conns)| std::iter::repeat(user_id).take(conns.len()))
                .collect()
        };
        for user_id in cleared {
            self.shared.hub.publish(HubEvent::SseDisconnected { user_id });
        }
        tracing::info!("SSE streamer 已关闭");
    }

    pub fn connection_count(&self) -> usize {
        self.shared
            .registry
            .read()
            .clients
            .values()
            .map(HashMap::len)
            .sum()
    }
}

fn deliver(user_id: UserId, conns: &HashMap<Uuid, mpsc::Sender<SseEvent>>, event: &SseEvent) {
    for sender in conns.values() {
        if let Err(TrySendError::Full(_)) = sender.try_send(event.clone()) {
            tracing::warn!(user_id = %user_id, event = %event.event, "SSE 队列已满，丢弃事件");
        }
    }
}
