//! 消息管理器
//!
//! 负责消息的创建、编辑、删除、置顶与表情，写操作完成后失效缓存并发布总线事件。

use std::sync::Arc;

use chrono::Utc;
use config::RealtimeConfig;
use domain::{
    event_detail, ChannelEvent, ChannelEventDetail, ChannelEventType, ChannelId, DomainError,
    DomainResult, HubEvent, Message, MessageId, MessageStamp, Pin, StampId, UserId,
};

use super::cache::MessageCache;
use super::parser::MessageParser;
use crate::channel::ChannelManager;
use crate::hub::Hub;
use crate::repository::{ChannelRepository, MessageRepository, UnreadRepository};
use crate::tasks::TaskTracker;

pub struct MessageManager {
    repo: Arc<dyn MessageRepository>,
    unreads: Arc<dyn UnreadRepository>,
    channel_repo: Arc<dyn ChannelRepository>,
    channels: Arc<ChannelManager>,
    hub: Arc<Hub>,
    cache: MessageCache,
    parser: MessageParser,
    tasks: TaskTracker,
    pin_limit: usize,
}

impl MessageManager {
    pub fn new(
        repo: Arc<dyn MessageRepository>,
        unreads: Arc<dyn UnreadRepository>,
        channel_repo: Arc<dyn ChannelRepository>,
        channels: Arc<ChannelManager>,
        hub: Arc<Hub>,
        config: &RealtimeConfig,
    ) -> DomainResult<Self> {
        let parser = MessageParser::new(&config.origin)
            .map_err(|err| DomainError::internal(format!("invalid origin pattern: {err}")))?;
        Ok(Self {
            repo,
            unreads,
            channel_repo,
            channels,
            hub,
            cache: MessageCache::new(config.message_cache_size, config.message_cache_ttl),
            parser,
            tasks: TaskTracker::new(),
            pin_limit: config.pin_limit,
        })
    }

    pub fn parser(&self) -> &MessageParser {
        &self.parser
    }

    pub async fn get(&self, id: MessageId) -> DomainResult<Message> {
        if id.is_nil() {
            return Err(DomainError::NotFound);
        }
        let repo = self.repo.clone();
        self.cache
            .get_or_load(id, || async move { Ok(repo.get_message(id).await?) })
            .await
    }

    pub async fn create(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        content: &str,
    ) -> DomainResult<Message> {
        let channel = self.channels.get_channel(channel_id).await?;
        if channel.is_public && channel.is_archived() {
            return Err(DomainError::ChannelArchived);
        }

        let message = self
            .repo
            .create_message(Message::new(user_id, channel_id, content))
            .await?;
        let parsed = self.parser.parse(&message.text);
        let cited_ids = parsed.citations.clone();

        self.hub.publish(HubEvent::MessageCreated {
            message: message.clone(),
            parsed,
        });
        if !cited_ids.is_empty() {
            self.hub.publish(HubEvent::MessageCited {
                message: message.clone(),
                cited_ids,
            });
        }
        tracing::debug!(message_id = %message.id, channel_id = %channel_id, "消息已创建");
        Ok(message)
    }

    /// 向私聊发送消息，私聊频道不存在时自动创建
    pub async fn create_dm(
        &self,
        from: UserId,
        to: UserId,
        content: &str,
    ) -> DomainResult<Message> {
        let channel = self.channels.get_dm_channel(from, to).await?;
        self.create(channel.id, from, content).await
    }

    pub async fn edit(&self, id: MessageId, content: &str) -> DomainResult<Message> {
        let old_message = self.get(id).await?;
        self.ensure_writable(old_message.channel_id).await?;

        let message = self.repo.update_message(id, content.to_string()).await?;
        self.cache.invalidate(id);
        self.hub.publish(HubEvent::MessageUpdated {
            message: message.clone(),
            old_message,
        });
        Ok(message)
    }

    pub async fn delete(&self, id: MessageId) -> DomainResult<()> {
        let message = self.get(id).await?;
        self.ensure_writable(message.channel_id).await?;

        self.repo.delete_message(id).await?;
        self.cache.invalidate(id);
        let deleted_unreads = match self.unreads.delete_unreads_by_message(id).await {
            Ok(unreads) => unreads,
            Err(err) => {
                tracing::warn!(message_id = %id, error = %err, "删除未读记录失败");
                Vec::new()
            }
        };
        self.hub.publish(HubEvent::MessageDeleted {
            message,
            deleted_unreads,
        });
        Ok(())
    }

    pub async fn pin(&self, id: MessageId, user_id: UserId) -> DomainResult<Pin> {
        let message = self.get(id).await?;
        if message.is_pinned() {
            return Err(DomainError::AlreadyExists);
        }
        self.ensure_writable(message.channel_id).await?;
        if self.repo.count_pins(message.channel_id).await? >= self.pin_limit {
            return Err(DomainError::PinLimitExceeded);
        }

        let pin = self.repo.pin_message(id, user_id).await?;
        self.cache.invalidate(id);
        self.record_event(
            message.channel_id,
            ChannelEventType::PinAdded,
            event_detail! { "userId" => user_id, "messageId" => id },
        );
        self.hub.publish(HubEvent::MessagePinned {
            message_id: id,
            channel_id: message.channel_id,
        });
        Ok(pin)
    }

    pub async fn unpin(&self, id: MessageId, user_id: UserId) -> DomainResult<()> {
        let message = self.get(id).await?;
        if !message.is_pinned() {
            return Err(DomainError::NotFound);
        }
        self.ensure_writable(message.channel_id).await?;

        self.repo.unpin_message(id).await?;
        self.cache.invalidate(id);
        self.record_event(
            message.channel_id,
            ChannelEventType::PinRemoved,
            event_detail! { "userId" => user_id, "messageId" => id },
        );
        self.hub.publish(HubEvent::MessageUnpinned {
            message_id: id,
            channel_id: message.channel_id,
        });
        Ok(())
    }

    /// 已有同一表情时数量累加
    pub async fn add_stamps(
        &self,
        id: MessageId,
        stamp_id: StampId,
        user_id: UserId,
        n: u32,
    ) -> DomainResult<MessageStamp> {
        if n == 0 {
            return Err(DomainError::invalid_argument("count", "must be positive"));
        }
        let message = self.get(id).await?;
        self.ensure_writable(message.channel_id).await?;

        let stamp = self.repo.add_stamp(id, stamp_id, user_id, n).await?;
        self.cache.invalidate(id);
        self.hub.publish(HubEvent::MessageStamped {
            message_id: id,
            user_id,
            stamp_id,
            count: stamp.count,
            created_at: stamp.created_at,
        });
        Ok(stamp)
    }

    pub async fn remove_stamps(
        &self,
        id: MessageId,
        stamp_id: StampId,
        user_id: UserId,
    ) -> DomainResult<()> {
        let message = self.get(id).await?;
        self.ensure_writable(message.channel_id).await?;

        self.repo.remove_stamp(id, stamp_id, user_id).await?;
        self.cache.invalidate(id);
        self.hub.publish(HubEvent::MessageUnstamped {
            message_id: id,
            user_id,
            stamp_id,
        });
        Ok(())
    }

    pub async fn is_accessible(&self, id: MessageId, user_id: UserId) -> DomainResult<bool> {
        let message = self.get(id).await?;
        self.channels
            .is_channel_accessible_to_user(user_id, message.channel_id)
            .await
    }

    /// 等待后台审计记录写完
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }

    async fn ensure_writable(&self, channel_id: ChannelId) -> DomainResult<()> {
        let channel = self.channels.get_channel(channel_id).await?;
        if channel.is_archived() {
            return Err(DomainError::ChannelArchived);
        }
        Ok(())
    }

    fn record_event(
        &self,
        channel_id: ChannelId,
        event_type: ChannelEventType,
        detail: ChannelEventDetail,
    ) {
        let repo = self.channel_repo.clone();
        let event = ChannelEvent {
            channel_id,
            event_type,
            detail,
            date_time: Utc::now(),
        };
        self.tasks.spawn(async move {
            if let Err(err) = repo.record_channel_event(event).await {
                tracing::warn!(channel_id = %channel_id, event_type = %event_type, error = %err, "记录置顶事件失败");
            }
        });
    }
}
