//! 用户总数计数

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use domain::{DomainResult, HubEvent, Topic};
use tokio::task::JoinHandle;

use super::spawn_listener;
use crate::hub::Hub;
use crate::repository::UserRepository;

pub struct UserCounter {
    total: AtomicU64,
}

impl UserCounter {
    /// 初始值读取失败时返回错误，不以 0 继续
    pub async fn init(repo: &dyn UserRepository) -> DomainResult<Self> {
        let total = repo.count_users().await?;
        Ok(Self {
            total: AtomicU64::new(total),
        })
    }

    pub fn spawn(self: &Arc<Self>, hub: &Hub, capacity: usize) -> JoinHandle<()> {
        let counter = self.clone();
        spawn_listener(hub, capacity, &[Topic::UserCreated], move |event| {
            counter.handle(&event)
        })
    }

    pub fn handle(&self, event: &HubEvent) {
        if let HubEvent::UserCreated { .. } = event {
            self.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockUserRepository;
    use domain::{RepositoryError, UserId};

    #[tokio::test]
    async fn init_surfaces_repository_errors() {
        let mut repo = MockUserRepository::new();
        repo.expect_count_users()
            .returning(|| Err(RepositoryError::storage("connection refused")));
        assert!(UserCounter::init(&repo).await.is_err());
    }

    #[tokio::test]
    async fn counts_created_users() {
        let mut repo = MockUserRepository::new();
        repo.expect_count_users().returning(|| Ok(41));
        let counter = UserCounter::init(&repo).await.unwrap();
        counter.handle(&HubEvent::UserCreated {
            user_id: UserId::generate(),
        });
        assert_eq!(counter.get(), 42);
    }
}
