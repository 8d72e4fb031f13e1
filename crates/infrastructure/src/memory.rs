//! 内存仓储
//!
//! 单进程部署和测试使用。所有数据放在一把读写锁后面，
//! 语义与 PostgreSQL 实现保持一致（软删除、表情累加、订阅差异计算）。

use std::collections::{HashMap, HashSet};

use application::repository::{
    ChannelRepository, DeviceRepository, FileRepository, MessageRepository, UnreadRepository,
    UserRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Channel, ChannelEvent, ChannelId, ChannelSubscription, DeviceToken, DmChannelMapping, FileId,
    FileMeta, GroupId, Message, MessageId, MessageStamp, Pin, RepositoryError, StampId,
    SubscriptionLevel, Unread, UpdateChannelArgs, User, UserGroup, UserId,
};
use parking_lot::RwLock;

#[derive(Default)]
struct State {
    channels: HashMap<ChannelId, Channel>,
    dm_mappings: Vec<DmChannelMapping>,
    subscriptions: HashMap<(ChannelId, UserId), SubscriptionLevel>,
    channel_events: Vec<ChannelEvent>,
    messages: HashMap<MessageId, Message>,
    users: HashMap<UserId, User>,
    groups: HashMap<GroupId, UserGroup>,
    unreads: HashMap<(UserId, MessageId), Unread>,
    devices: HashMap<String, DeviceToken>,
    files: HashMap<FileId, FileMeta>,
}

impl State {
    fn live_message_mut(&mut self, id: MessageId) -> Result<&mut Message, RepositoryError> {
        self.messages
            .get_mut(&id)
            .filter(|m| !m.deleted)
            .ok_or(RepositoryError::NotFound)
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        self.state.write().users.insert(user.id, user);
    }

    pub fn add_group(&self, group: UserGroup) {
        self.state.write().groups.insert(group.id, group);
    }

    pub fn add_file(&self, file: FileMeta) {
        self.state.write().files.insert(file.id, file);
    }

    /// 已记录的频道审计事件，按写入顺序
    pub fn channel_events(&self) -> Vec<ChannelEvent> {
        self.state.read().channel_events.clone()
    }

    pub fn unreads(&self) -> Vec<Unread> {
        self.state.read().unreads.values().cloned().collect()
    }

    pub fn device_tokens(&self) -> Vec<DeviceToken> {
        self.state.read().devices.values().cloned().collect()
    }
}

#[async_trait]
impl ChannelRepository for MemoryRepository {
    async fn create_public_channel(&self, channel: Channel) -> Result<Channel, RepositoryError> {
        let mut state = self.state.write();
        if state.channels.contains_key(&channel.id) {
            return Err(RepositoryError::AlreadyExists);
        }
        state.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn update_channel(
        &self,
        id: ChannelId,
        args: UpdateChannelArgs,
    ) -> Result<Channel, RepositoryError> {
        let mut state = self.state.write();
        let channel = state.channels.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(name) = args.name {
            channel.name = name;
        }
        if let Some(topic) = args.topic {
            channel.topic = topic;
        }
        if let Some(visible) = args.visibility {
            channel.is_visible = visible;
        }
        if let Some(forced) = args.force_notification {
            channel.is_forced = forced;
        }
        if let Some(parent) = args.parent {
            channel.parent_id = parent;
        }
        channel.updater_id = args.updater_id;
        channel.updated_at = Utc::now();
        Ok(channel.clone())
    }

    async fn archive_channels(
        &self,
        ids: Vec<ChannelId>,
        updater_id: UserId,
    ) -> Result<Vec<Channel>, RepositoryError> {
        let mut state = self.state.write();
        if ids.iter().any(|id| !state.channels.contains_key(id)) {
            return Err(RepositoryError::NotFound);
        }
        let now = Utc::now();
        let mut archived = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(channel) = state.channels.get_mut(&id) {
                channel.is_visible = false;
                channel.updater_id = updater_id;
                channel.updated_at = now;
                archived.push(channel.clone());
            }
        }
        Ok(archived)
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Channel, RepositoryError> {
        self.state
            .read()
            .channels
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_public_channels(&self) -> Result<Vec<Channel>, RepositoryError> {
        Ok(self
            .state
            .read()
            .channels
            .values()
            .filter(|c| c.is_public)
            .cloned()
            .collect())
    }

    async fn get_direct_message_channel(
        &self,
        user1: UserId,
        user2: UserId,
    ) -> Result<Option<Channel>, RepositoryError> {
        let state = self.state.read();
        let found = state.dm_mappings.iter().find(|m| {
            (m.user1 == user1 && m.user2 == user2) || (m.user1 == user2 && m.user2 == user1)
        });
        Ok(found.and_then(|m| state.channels.get(&m.channel_id).cloned()))
    }

    async fn create_direct_message_channel(
        &self,
        channel: Channel,
        user1: UserId,
        user2: UserId,
    ) -> Result<Channel, RepositoryError> {
        let mut state = self.state.write();
        if state.channels.contains_key(&channel.id) {
            return Err(RepositoryError::AlreadyExists);
        }
        state.dm_mappings.push(DmChannelMapping {
            channel_id: channel.id,
            user1,
            user2,
        });
        state.channels.insert(channel.id, channel.clone());
        Ok(channel)
    }

    async fn get_dm_channel_mappings(
        &self,
        user_id: UserId,
    ) -> Result<Vec<DmChannelMapping>, RepositoryError> {
        Ok(self
            .state
            .read()
            .dm_mappings
            .iter()
            .filter(|m| m.user1 == user_id || m.user2 == user_id)
            .copied()
            .collect())
    }

    async fn get_private_channel_member_ids(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let state = self.state.read();
        let mut members = Vec::new();
        for mapping in state.dm_mappings.iter().filter(|m| m.channel_id == channel_id) {
            for user in [mapping.user1, mapping.user2] {
                if !members.contains(&user) {
                    members.push(user);
                }
            }
        }
        Ok(members)
    }

    async fn is_private_channel_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.state.read().dm_mappings.iter().any(|m| {
            m.channel_id == channel_id && (m.user1 == user_id || m.user2 == user_id)
        }))
    }

    async fn get_channel_subscriptions(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<ChannelSubscription>, RepositoryError> {
        Ok(self
            .state
            .read()
            .subscriptions
            .iter()
            .filter(|((ch, _), level)| *ch == channel_id && **level != SubscriptionLevel::None)
            .map(|((ch, user), level)| ChannelSubscription {
                user_id: *user,
                channel_id: *ch,
                level: *level,
            })
            .collect())
    }

    async fn change_channel_subscriptions(
        &self,
        channel_id: ChannelId,
        subscriptions: HashMap<UserId, SubscriptionLevel>,
        keep_off_level: bool,
    ) -> Result<(Vec<UserId>, Vec<UserId>), RepositoryError> {
        let mut state = self.state.write();
        let mut on = Vec::new();
        let mut off = Vec::new();
        for (user_id, level) in subscriptions {
            let key = (channel_id, user_id);
            let current = state.subscriptions.get(&key).copied().unwrap_or_default();
            // 未订阅的用户保持不变
            if keep_off_level && current == SubscriptionLevel::None {
                continue;
            }
            if current == level {
                continue;
            }
            if level == SubscriptionLevel::None {
                state.subscriptions.remove(&key);
            } else {
                state.subscriptions.insert(key, level);
            }
            match (current.marks(), level.marks()) {
                (false, true) => on.push(user_id),
                (true, false) => off.push(user_id),
                _ => {}
            }
        }
        Ok((on, off))
    }

    async fn record_channel_event(&self, event: ChannelEvent) -> Result<(), RepositoryError> {
        self.state.write().channel_events.push(event);
        Ok(())
    }

    async fn count_channels(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.read().channels.len() as u64)
    }
}

#[async_trait]
impl MessageRepository for MemoryRepository {
    async fn create_message(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut state = self.state.write();
        if state.messages.contains_key(&message.id) {
            return Err(RepositoryError::AlreadyExists);
        }
        state.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn update_message(
        &self,
        id: MessageId,
        text: String,
    ) -> Result<Message, RepositoryError> {
        let mut state = self.state.write();
        let message = state.live_message_mut(id)?;
        message.text = text;
        message.updated_at = Utc::now();
        Ok(message.clone())
    }

    async fn delete_message(&self, id: MessageId) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let message = state.live_message_mut(id)?;
        message.deleted = true;
        message.pin = None;
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Message, RepositoryError> {
        self.state
            .read()
            .messages
            .get(&id)
            .filter(|m| !m.deleted)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn add_stamp(
        &self,
        message_id: MessageId,
        stamp_id: StampId,
        user_id: UserId,
        count: u32,
    ) -> Result<MessageStamp, RepositoryError> {
        let mut state = self.state.write();
        let message = state.live_message_mut(message_id)?;
        let now = Utc::now();
        if let Some(stamp) = message
            .stamps
            .iter_mut()
            .find(|s| s.stamp_id == stamp_id && s.user_id == user_id)
        {
            stamp.count = stamp.count.saturating_add(count);
            stamp.updated_at = now;
            return Ok(stamp.clone());
        }
        let stamp = MessageStamp {
            message_id,
            stamp_id,
            user_id,
            count,
            created_at: now,
            updated_at: now,
        };
        message.stamps.push(stamp.clone());
        Ok(stamp)
    }

    async fn remove_stamp(
        &self,
        message_id: MessageId,
        stamp_id: StampId,
        user_id: UserId,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let message = state.live_message_mut(message_id)?;
        message
            .stamps
            .retain(|s| !(s.stamp_id == stamp_id && s.user_id == user_id));
        Ok(())
    }

    async fn pin_message(&self, id: MessageId, user_id: UserId) -> Result<Pin, RepositoryError> {
        let mut state = self.state.write();
        let message = state.live_message_mut(id)?;
        if message.pin.is_some() {
            return Err(RepositoryError::AlreadyExists);
        }
        let pin = Pin {
            message_id: id,
            user_id,
            created_at: Utc::now(),
        };
        message.pin = Some(pin.clone());
        Ok(pin)
    }

    async fn unpin_message(&self, id: MessageId) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        let message = state.live_message_mut(id)?;
        message.pin.take().map(|_| ()).ok_or(RepositoryError::NotFound)
    }

    async fn count_pins(&self, channel_id: ChannelId) -> Result<usize, RepositoryError> {
        Ok(self
            .state
            .read()
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id && !m.deleted && m.pin.is_some())
            .count())
    }

    async fn count_messages(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.read().messages.len() as u64)
    }
}

#[async_trait]
impl UserRepository for MemoryRepository {
    async fn get_user(&self, id: UserId) -> Result<User, RepositoryError> {
        self.state
            .read()
            .users
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_active_non_bot_user_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        Ok(self
            .state
            .read()
            .users
            .values()
            .filter(|u| u.is_active() && !u.bot)
            .map(|u| u.id)
            .collect())
    }

    async fn get_group_member_ids(
        &self,
        group_id: GroupId,
    ) -> Result<Vec<UserId>, RepositoryError> {
        self.state
            .read()
            .groups
            .get(&group_id)
            .map(|g| g.members.clone())
            .ok_or(RepositoryError::NotFound)
    }

    async fn count_users(&self) -> Result<u64, RepositoryError> {
        Ok(self.state.read().users.len() as u64)
    }
}

#[async_trait]
impl UnreadRepository for MemoryRepository {
    async fn set_message_unreads(
        &self,
        message: Message,
        targets: HashMap<UserId, bool>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        for (user_id, noticeable) in targets {
            state.unreads.insert(
                (user_id, message.id),
                Unread {
                    user_id,
                    channel_id: message.channel_id,
                    message_id: message.id,
                    noticeable,
                    message_created_at: message.created_at,
                },
            );
        }
        Ok(())
    }

    async fn delete_unreads_by_message(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<Unread>, RepositoryError> {
        let mut state = self.state.write();
        let keys: Vec<_> = state
            .unreads
            .keys()
            .filter(|(_, m)| *m == message_id)
            .copied()
            .collect();
        Ok(keys
            .into_iter()
            .filter_map(|key| state.unreads.remove(&key))
            .collect())
    }

    async fn get_unread_message_count(&self, user_id: UserId) -> Result<u64, RepositoryError> {
        Ok(self
            .state
            .read()
            .unreads
            .keys()
            .filter(|(u, _)| *u == user_id)
            .count() as u64)
    }
}

#[async_trait]
impl DeviceRepository for MemoryRepository {
    async fn register_device(&self, token: DeviceToken) -> Result<(), RepositoryError> {
        self.state.write().devices.insert(token.token.clone(), token);
        Ok(())
    }

    async fn get_device_tokens(
        &self,
        user_ids: Vec<UserId>,
    ) -> Result<Vec<DeviceToken>, RepositoryError> {
        let wanted: HashSet<UserId> = user_ids.into_iter().collect();
        Ok(self
            .state
            .read()
            .devices
            .values()
            .filter(|d| wanted.contains(&d.user_id))
            .cloned()
            .collect())
    }

    async fn delete_device_tokens(&self, tokens: Vec<String>) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        for token in tokens {
            state.devices.remove(&token);
        }
        Ok(())
    }
}

#[async_trait]
impl FileRepository for MemoryRepository {
    async fn get_file_meta(&self, id: FileId) -> Result<FileMeta, RepositoryError> {
        self.state
            .read()
            .files
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}
