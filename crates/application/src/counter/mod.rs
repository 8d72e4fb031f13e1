//! 运行时计数器
//!
//! 计数器各自订阅事件总线维护数值，供统计接口读取。

pub mod channel;
pub mod message;
pub mod online;
pub mod unread;
pub mod user;

use std::sync::Arc;

use domain::{DomainResult, HubEvent, Topic};
use serde::Serialize;
use tokio::task::JoinHandle;

pub use channel::ChannelCounter;
pub use message::MessageCounter;
pub use online::OnlineCounter;
pub use unread::UnreadMessageCounter;
pub use user::UserCounter;

use crate::hub::Hub;
use crate::repository::{ChannelRepository, MessageRepository, UserRepository};

/// 订阅指定主题并逐个交给 `handler`，订阅关闭后任务结束
pub(crate) fn spawn_listener<F>(
    hub: &Hub,
    capacity: usize,
    topics: &[Topic],
    mut handler: F,
) -> JoinHandle<()>
where
    F: FnMut(HubEvent) + Send + 'static,
{
    let mut subscription = hub.subscribe(capacity, topics);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            handler(event);
        }
    })
}

pub struct Counters {
    pub online: Arc<OnlineCounter>,
    pub unread: Arc<UnreadMessageCounter>,
    pub messages: Arc<MessageCounter>,
    pub channels: Arc<ChannelCounter>,
    pub users: Arc<UserCounter>,
}

impl Counters {
    /// 读取初始值；任意一个失败则整体失败
    pub async fn init(
        hub: Arc<Hub>,
        messages: &dyn MessageRepository,
        channels: &dyn ChannelRepository,
        users: &dyn UserRepository,
    ) -> DomainResult<Self> {
        Ok(Self {
            online: Arc::new(OnlineCounter::new(hub)),
            unread: Arc::new(UnreadMessageCounter::new()),
            messages: Arc::new(MessageCounter::init(messages).await?),
            channels: Arc::new(ChannelCounter::init(channels).await?),
            users: Arc::new(UserCounter::init(users).await?),
        })
    }

    pub fn spawn(&self, hub: &Hub, capacity: usize) -> Vec<JoinHandle<()>> {
        vec![
            self.online.spawn(capacity),
            self.unread.spawn(hub, capacity),
            self.messages.spawn(hub, capacity),
            self.channels.spawn(hub, capacity),
            self.users.spawn(hub, capacity),
        ]
    }
}

/// 实时层运行指标快照
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    pub online_users: usize,
    pub ws_sessions: usize,
    pub bot_ws_sessions: usize,
    pub sse_streams: usize,
    pub viewers: usize,
    pub webrtc_users: usize,
    pub webrtc_channels: usize,
    pub hub_subscribers: usize,
    pub total_messages: u64,
    pub total_channels: u64,
    pub total_users: u64,
    pub unread_messages: i64,
}
