//! 消息缓存
//!
//! 进程内、带 TTL 的有界缓存。同一个 key 的并发读取共享一次加载。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use domain::{DomainResult, Message, MessageId};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;

struct Entry {
    cell: Arc<OnceCell<Message>>,
    inserted_at: Instant,
}

pub struct MessageCache {
    entries: Mutex<HashMap<MessageId, Entry>>,
    capacity: usize,
    ttl: Duration,
}

impl MessageCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// 命中直接返回，否则调用 `loader`；加载失败不会被缓存
    pub async fn get_or_load<F, Fut>(&self, id: MessageId, loader: F) -> DomainResult<Message>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DomainResult<Message>>,
    {
        let cell = self.cell_for(id);
        let message = cell.get_or_try_init(loader).await?;
        Ok(message.clone())
    }

    pub fn invalidate(&self, id: MessageId) {
        self.entries.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell_for(&self, id: MessageId) -> Arc<OnceCell<Message>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&id) {
            if now.duration_since(entry.inserted_at) < self.ttl {
                return entry.cell.clone();
            }
        }

        if entries.len() >= self.capacity && !entries.contains_key(&id) {
            let ttl = self.ttl;
            entries.retain(|_, e| now.duration_since(e.inserted_at) < ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| *k);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        let cell = Arc::new(OnceCell::new());
        entries.insert(
            id,
            Entry {
                cell: cell.clone(),
                inserted_at: now,
            },
        );
        cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ChannelId, DomainError, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message() -> Message {
        Message::new(UserId::generate(), ChannelId::generate(), "hello")
    }

    #[tokio::test]
    async fn concurrent_gets_load_once() {
        let cache = Arc::new(MessageCache::new(8, Duration::from_secs(60)));
        let loads = Arc::new(AtomicUsize::new(0));
        let msg = message();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let loads = loads.clone();
            let msg = msg.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load(msg.id, || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(msg)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_and_failures_are_not_cached() {
        let cache = MessageCache::new(8, Duration::from_secs(60));
        let msg = message();

        let err = cache
            .get_or_load(msg.id, || async { Err(DomainError::NotFound) })
            .await;
        assert_eq!(err, Err(DomainError::NotFound));

        let first = msg.clone();
        cache.get_or_load(msg.id, || async { Ok(first) }).await.unwrap();

        let mut edited = msg.clone();
        edited.text = "edited".to_string();
        let cached = cache
            .get_or_load(msg.id, || async { Ok(edited.clone()) })
            .await
            .unwrap();
        assert_eq!(cached.text, "hello");

        tokio::time::advance(Duration::from_secs(61)).await;
        let reloaded = cache
            .get_or_load(msg.id, || async { Ok(edited) })
            .await
            .unwrap();
        assert_eq!(reloaded.text, "edited");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let cache = MessageCache::new(2, Duration::from_secs(60));
        for _ in 0..3 {
            let msg = message();
            cache.get_or_load(msg.id, || async { Ok(msg.clone()) }).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
    }
}
