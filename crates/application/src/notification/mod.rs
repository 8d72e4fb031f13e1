//! 通知服务
//!
//! 订阅事件总线，把每个事件翻译成 WebSocket / SSE 消息和移动端推送。
//! 每个事件在独立任务中处理，处理失败只记录日志。

mod handlers;

use std::sync::Arc;

use domain::{Topic, UserId};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::channel::ChannelManager;
use crate::hub::Hub;
use crate::message::MessageManager;
use crate::push::PushClient;
use crate::realtime::{SseEvent, SseStreamer, Streamer, Target};
use crate::repository::{FileRepository, UnreadRepository, UserRepository};
use crate::tasks::TaskTracker;
use crate::viewer::ViewerManager;

/// 通知服务关心的主题
pub const TOPICS: &[Topic] = &[
    Topic::MessageCreated,
    Topic::MessageUpdated,
    Topic::MessageDeleted,
    Topic::MessagePinned,
    Topic::MessageUnpinned,
    Topic::MessageStamped,
    Topic::MessageUnstamped,
    Topic::MessageStampsUpdated,
    Topic::MessageCited,
    Topic::ChannelCreated,
    Topic::ChannelUpdated,
    Topic::ChannelDeleted,
    Topic::ChannelStared,
    Topic::ChannelUnstared,
    Topic::ChannelRead,
    Topic::ChannelViewersChanged,
    Topic::ChannelSubscribersChanged,
    Topic::UserCreated,
    Topic::UserUpdated,
    Topic::UserIconUpdated,
    Topic::UserOnline,
    Topic::UserOffline,
    Topic::UserViewStateChanged,
    Topic::UserTagsUpdated,
    Topic::UserGroupCreated,
    Topic::UserGroupUpdated,
    Topic::UserGroupDeleted,
    Topic::UserGroupMemberAdded,
    Topic::UserGroupMemberRemoved,
    Topic::UserGroupAdminAdded,
    Topic::UserGroupAdminRemoved,
    Topic::StampCreated,
    Topic::StampUpdated,
    Topic::StampDeleted,
    Topic::StampPaletteCreated,
    Topic::StampPaletteUpdated,
    Topic::StampPaletteDeleted,
    Topic::ClipFolderCreated,
    Topic::ClipFolderUpdated,
    Topic::ClipFolderDeleted,
    Topic::ClipFolderMessageAdded,
    Topic::ClipFolderMessageDeleted,
    Topic::UserWebRtcStateChanged,
];

pub struct NotificationDependencies {
    pub hub: Arc<Hub>,
    pub channels: Arc<ChannelManager>,
    pub messages: Arc<MessageManager>,
    pub users: Arc<dyn UserRepository>,
    pub unreads: Arc<dyn UnreadRepository>,
    pub files: Arc<dyn FileRepository>,
    pub viewers: Arc<ViewerManager>,
    pub ws: Arc<Streamer>,
    pub sse: SseStreamer,
    /// 未启用推送时为 `None`
    pub push: Option<Arc<PushClient>>,
    pub origin: String,
}

pub struct NotificationService {
    hub: Arc<Hub>,
    channels: Arc<ChannelManager>,
    messages: Arc<MessageManager>,
    users: Arc<dyn UserRepository>,
    unreads: Arc<dyn UnreadRepository>,
    files: Arc<dyn FileRepository>,
    viewers: Arc<ViewerManager>,
    ws: Arc<Streamer>,
    sse: SseStreamer,
    push: Option<Arc<PushClient>>,
    origin: String,
    tasks: TaskTracker,
}

impl NotificationService {
    pub fn new(deps: NotificationDependencies) -> Self {
        let NotificationDependencies {
            hub,
            channels,
            messages,
            users,
            unreads,
            files,
            viewers,
            ws,
            sse,
            push,
            origin,
        } = deps;
        Self {
            hub,
            channels,
            messages,
            users,
            unreads,
            files,
            viewers,
            ws,
            sse,
            push,
            origin: origin.trim_end_matches('/').to_string(),
            tasks: TaskTracker::new(),
        }
    }

    /// 订阅总线并为每个事件启动一个处理任务
    pub fn start(self: &Arc<Self>, capacity: usize) -> JoinHandle<()> {
        let mut subscription = self.hub.subscribe(capacity, TOPICS);
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let handler = service.clone();
                service.tasks.spawn(async move {
                    let topic = event.topic();
                    if let Err(err) = handler.handle(event).await {
                        tracing::error!(topic = %topic, error = %err, "通知处理失败");
                    }
                });
            }
            tracing::info!("通知服务订阅已结束");
        })
    }

    /// 等待已经启动的处理任务结束
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }

    fn broadcast(&self, kind: &str, body: Value) {
        self.ws.write_message(kind, &body, &Target::all());
        self.sse.broadcast(&SseEvent::new(kind, body));
    }

    fn multicast(&self, user_ids: &[UserId], kind: &str, body: Value) {
        if user_ids.is_empty() {
            return;
        }
        self.ws
            .write_message(kind, &body, &Target::users(user_ids.iter().copied()));
        let event = SseEvent::new(kind, body);
        for user_id in user_ids {
            self.sse.multicast(*user_id, &event);
        }
    }
}
