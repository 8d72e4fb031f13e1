//! 表情事件节流
//!
//! 以消息 id 为 key 合并短时间内的表情变化：第一次触发后在一个间隔结束时
//! 调用一次回调，间隔内的后续触发全部并入这一次。长时间没有触发的 key 由后台清理。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domain::{DomainError, HubEvent, MessageId, Topic};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::hub::Hub;
use crate::message::MessageManager;

pub type ThrottleCallback = Arc<dyn Fn(MessageId) -> BoxFuture<'static, ()> + Send + Sync>;

struct Driver {
    pending: bool,
    touched_at: Instant,
}

pub struct StampThrottler {
    drivers: Mutex<HashMap<MessageId, Driver>>,
    callback: ThrottleCallback,
    interval: Duration,
    ttl: Duration,
}

impl StampThrottler {
    pub fn new(interval: Duration, ttl: Duration, callback: ThrottleCallback) -> Self {
        Self {
            drivers: Mutex::new(HashMap::new()),
            callback,
            interval,
            ttl,
        }
    }

    /// 回调读取消息当前的表情并发布 [`HubEvent::MessageStampsUpdated`]
    pub fn for_messages(
        messages: Arc<MessageManager>,
        hub: Arc<Hub>,
        interval: Duration,
        ttl: Duration,
    ) -> Self {
        let callback: ThrottleCallback = Arc::new(move |message_id| {
            let messages = messages.clone();
            let hub = hub.clone();
            Box::pin(async move {
                match messages.get(message_id).await {
                    Ok(message) => hub.publish(HubEvent::MessageStampsUpdated {
                        message_id,
                        stamps: message.stamps,
                    }),
                    Err(DomainError::NotFound) => {
                        tracing::debug!(message_id = %message_id, "消息已删除，跳过表情更新");
                    }
                    Err(err) => {
                        tracing::warn!(message_id = %message_id, error = %err, "读取消息表情失败");
                    }
                }
            })
        });
        Self::new(interval, ttl, callback)
    }

    pub fn trigger(self: &Arc<Self>, message_id: MessageId) {
        {
            let mut drivers = self.drivers.lock();
            let driver = drivers.entry(message_id).or_insert(Driver {
                pending: false,
                touched_at: Instant::now(),
            });
            driver.touched_at = Instant::now();
            if driver.pending {
                return;
            }
            driver.pending = true;
        }

        let throttler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(throttler.interval).await;
            if let Some(driver) = throttler.drivers.lock().get_mut(&message_id) {
                driver.pending = false;
            }
            (throttler.callback)(message_id).await;
        });
    }

    /// 清理超过 TTL 未触发且没有待执行回调的 key
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut drivers = self.drivers.lock();
        let before = drivers.len();
        drivers.retain(|_, d| d.pending || now.duration_since(d.touched_at) < self.ttl);
        before - drivers.len()
    }

    pub fn len(&self) -> usize {
        self.drivers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 订阅表情事件并定期清理，总线关闭后退出
    pub fn run(self: Arc<Self>, hub: &Hub, capacity: usize) -> JoinHandle<()> {
        let mut subscription = hub.subscribe(
            capacity,
            &[Topic::MessageStamped, Topic::MessageUnstamped],
        );
        let sweep_period = (self.ttl / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_period);
            sweep.tick().await;
            loop {
                tokio::select! {
                    event = subscription.recv() => match event {
                        Some(HubEvent::MessageStamped { message_id, .. })
                        | Some(HubEvent::MessageUnstamped { message_id, .. }) => {
                            self.trigger(message_id);
                        }
                        Some(_) => {}
                        None => break,
                    },
                    _ = sweep.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "清理空闲的表情节流 key");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{StampId, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(calls: Arc<AtomicUsize>) -> ThrottleCallback {
        Arc::new(move |_| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let throttler = Arc::new(StampThrottler::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            counting(calls.clone()),
        ));
        let id = MessageId::generate();

        for _ in 0..20 {
            throttler.trigger(id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        throttler.trigger(id);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_pending_and_recent_keys() {
        let throttler = Arc::new(StampThrottler::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            counting(Arc::new(AtomicUsize::new(0))),
        ));
        let (old, fresh) = (MessageId::generate(), MessageId::generate());

        throttler.trigger(old);
        tokio::time::sleep(Duration::from_secs(4)).await;
        throttler.trigger(fresh);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(throttler.sweep(), 1);
        assert_eq!(throttler.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hub_events_drive_triggers() {
        let hub = Hub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let throttler = Arc::new(StampThrottler::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            counting(calls.clone()),
        ));
        let handle = throttler.clone().run(&hub, 64);
        let message_id = MessageId::generate();

        for _ in 0..20 {
            hub.publish(HubEvent::MessageStamped {
                message_id,
                user_id: UserId::generate(),
                stamp_id: StampId::generate(),
                count: 1,
                created_at: Utc::now(),
            });
        }
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.abort();
    }
}
