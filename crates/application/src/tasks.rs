use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinSet;

/// 跟踪后台发出的任务（审计记录、推送批次等），关闭时统一等待
#[derive(Default)]
pub struct TaskTracker {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        // 顺手回收已经结束的任务
        while tasks.try_join_next().is_some() {}
        tasks.spawn(future);
    }

    /// 等待目前已登记的全部任务结束
    pub async fn wait(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "后台任务异常退出");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn wait_blocks_until_spawned_tasks_finish() {
        let tracker = TaskTracker::new();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..3 {
            let done = done.clone();
            tracker.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10 * (i + 1))).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        tracker.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(tracker.is_empty());
    }
}
