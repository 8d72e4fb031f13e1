//! 进程内事件总线
//!
//! 发布方永远不会被阻塞：每个订阅者持有一个有界队列，队列满时记录警告并丢弃该事件。
//! 同一主题的事件按发布顺序投递给同一个订阅者。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use domain::{HubEvent, Topic};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

struct Subscriber {
    /// 为空表示订阅全部主题
    topics: HashSet<Topic>,
    sender: mpsc::Sender<HubEvent>,
}

impl Subscriber {
    fn accepts(&self, topic: Topic) -> bool {
        self.topics.is_empty() || self.topics.contains(&topic)
    }
}

/// 一个订阅，持有接收端
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<HubEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 等待下一条事件，总线关闭或退订后返回 `None`
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
pub struct Hub {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅指定主题，`topics` 为空时订阅全部
    pub fn subscribe(&self, capacity: usize, topics: &[Topic]) -> Subscription {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().insert(
            id,
            Subscriber {
                topics: topics.iter().copied().collect(),
                sender,
            },
        );
        tracing::debug!(subscription_id = id, topics = topics.len(), "新增总线订阅");
        Subscription { id, receiver }
    }

    /// 退订并丢弃尚未消费的事件
    pub fn unsubscribe(&self, mut subscription: Subscription) {
        self.subscribers.write().remove(&subscription.id);
        subscription.receiver.close();
        while subscription.receiver.try_recv().is_ok() {}
    }

    pub fn publish(&self, event: HubEvent) {
        let topic = event.topic();
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, subscriber) in subscribers.iter() {
                if !subscriber.accepts(topic) {
                    continue;
                }
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(subscription_id = id, topic = %topic, "订阅者队列已满，丢弃事件");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
