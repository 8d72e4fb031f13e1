//! 仓储接口
//!
//! 实时核心只通过这些 trait 访问持久层，具体实现位于 infrastructure。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Channel, ChannelEvent, ChannelId, ChannelSubscription, DeviceToken, DmChannelMapping, FileId,
    FileMeta, GroupId, Message, MessageId, MessageStamp, Pin, RepositoryError, StampId,
    SubscriptionLevel, Unread, UpdateChannelArgs, User, UserId,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn create_public_channel(&self, channel: Channel) -> Result<Channel, RepositoryError>;

    // 只修改 args 中出现的字段，返回修改后的频道
    async fn update_channel(
        &self,
        id: ChannelId,
        args: UpdateChannelArgs,
    ) -> Result<Channel, RepositoryError>;

    // 批量归档，一次写入
    async fn archive_channels(
        &self,
        ids: Vec<ChannelId>,
        updater_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError>;

    async fn get_channel(&self, id: ChannelId) -> Result<Channel, RepositoryError>;

    // 启动时重建频道树用
    async fn get_public_channels(&self) -> Result<Vec<Channel>, RepositoryError>;

    async fn get_direct_message_channel(
        &self,
        user1: UserId,
        user2: UserId,
    ) -> Result<Option<Channel>, RepositoryError>;

    async fn create_direct_message_channel(
        &self,
        channel: Channel,
        user1: UserId,
        user2: UserId,
    ) -> Result<Channel, RepositoryError>;

    async fn get_dm_channel_mappings(
        &self,
        user_id: UserId,
    ) -> Result<Vec<DmChannelMapping>, RepositoryError>;

    async fn get_private_channel_member_ids(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<UserId>, RepositoryError>;

    async fn is_private_channel_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;

    async fn get_channel_subscriptions(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError>;

    // 返回 (新开启的用户, 新关闭的用户)
    async fn change_channel_subscriptions(
        &self,
        channel_id: ChannelId,
        subscriptions: HashMap<UserId, SubscriptionLevel>,
        keep_off_level: bool,
    ) -> Result<(Vec<UserId>, Vec<UserId>), RepositoryError>;

    async fn record_channel_event(&self, event: ChannelEvent) -> Result<(), RepositoryError>;

    async fn count_channels(&self) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError>;

    async fn update_message(&self, id: MessageId, text: String)
        -> Result<Message, RepositoryError>;

    // 软删除
    async fn delete_message(&self, id: MessageId) -> Result<(), RepositoryError>;

    async fn get_message(&self, id: MessageId) -> Result<Message, RepositoryError>;

    // 已存在时 count 累加
    async fn add_stamp(
        &self,
        message_id: MessageId,
        stamp_id: StampId,
        user_id: UserId,
        count: u32,
    ) -> Result<MessageStamp, RepositoryError>;

    async fn remove_stamp(
        &self,
        message_id: MessageId,
        stamp_id: StampId,
        user_id: UserId,
    ) -> Result<(), RepositoryError>;

    async fn pin_message(&self, id: MessageId, user_id: UserId) -> Result<Pin, RepositoryError>;

    async fn unpin_message(&self, id: MessageId) -> Result<(), RepositoryError>;

    async fn count_pins(&self, channel_id: ChannelId) -> Result<usize, RepositoryError>;

    // 包括已删除的消息
    async fn count_messages(&self) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<User, RepositoryError>;

    async fn get_active_non_bot_user_ids(&self) -> Result<Vec<UserId>, RepositoryError>;

    async fn get_group_member_ids(&self, group_id: GroupId) -> Result<Vec<UserId>, RepositoryError>;

    async fn count_users(&self) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnreadRepository: Send + Sync {
    // user -> noticeable，一次批量写入
    async fn set_message_unreads(
        &self,
        message: Message,
        targets: HashMap<UserId, bool>,
    ) -> Result<(), RepositoryError>;

    async fn delete_unreads_by_message(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<Unread>, RepositoryError>;

    async fn get_unread_message_count(&self, user_id: UserId) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn register_device(&self, token: DeviceToken) -> Result<(), RepositoryError>;

    async fn get_device_tokens(
        &self,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<DeviceToken>, RepositoryError>;

    async fn delete_device_tokens(&self, tokens: Vec<String>) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn get_file_meta(&self, id: FileId) -> Result<FileMeta, RepositoryError>;
}
