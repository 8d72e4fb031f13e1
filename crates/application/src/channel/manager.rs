//! 频道管理器
//!
//! 所有结构性变更（创建、改名、移动、归档）先在操作锁内完成前置检查，
//! 再写库、更新频道树，最后在总线上发布事件。审计记录在后台任务中完成，
//! 失败只记录警告。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use domain::{
    event_detail, Channel, ChannelEvent, ChannelEventDetail, ChannelEventType, ChannelId,
    ChannelName, ChannelSubscription, DomainError, DomainResult, HubEvent, SubscriptionLevel,
    UpdateChannelArgs, UserId,
};
use rand::{distr::Alphanumeric, Rng};
use tokio::sync::Mutex;

use super::tree::ChannelTree;
use crate::hub::Hub;
use crate::repository::ChannelRepository;
use crate::tasks::TaskTracker;

const DM_CHANNEL_NAME_RANDOM_LEN: usize = 17;

pub struct ChannelManager {
    repo: Arc<dyn ChannelRepository>,
    hub: Arc<Hub>,
    tree: ChannelTree,
    // 串行化跨越数据库调用的结构性变更
    op_lock: Mutex<()>,
    tasks: TaskTracker,
    max_depth: usize,
}

impl ChannelManager {
    /// 从数据库加载公开频道并重建频道树
    pub async fn new(
        repo: Arc<dyn ChannelRepository>,
        hub: Arc<Hub>,
        max_depth: usize,
    ) -> DomainResult<Self> {
        let channels = repo.get_public_channels().await?;
        let tree = ChannelTree::from_channels(channels);
        tracing::info!(channels = tree.len(), "频道树加载完成");
        Ok(Self {
            repo,
            hub,
            tree,
            op_lock: Mutex::new(()),
            tasks: TaskTracker::new(),
            max_depth,
        })
    }

    pub fn tree(&self) -> &ChannelTree {
        &self.tree
    }

    /// 先查频道树，不在树里（私聊等）再查数据库
    pub async fn get_channel(&self, id: ChannelId) -> DomainResult<Channel> {
        if let Some(channel) = self.tree.get_channel(id) {
            return Ok(channel);
        }
        Ok(self.repo.get_channel(id).await?)
    }

    pub async fn create_public_channel(
        &self,
        name: &str,
        parent: ChannelId,
        creator_id: UserId,
    ) -> DomainResult<Channel> {
        let name = ChannelName::parse(name)?;

        let _guard = self.op_lock.lock().await;
        if self.tree.is_child_present(name.as_str(), parent) {
            return Err(DomainError::ChannelNameConflicts);
        }
        if !parent.is_nil() {
            let parent_channel = self
                .tree
                .get_channel(parent)
                .ok_or(DomainError::InvalidParentChannel)?;
            if parent_channel.is_archived() {
                return Err(DomainError::ChannelArchived);
            }
            if self.tree.get_ascendant_ids(parent).len() + 2 > self.max_depth {
                return Err(DomainError::TooDeepChannel);
            }
        }

        let channel = self
            .repo
            .create_public_channel(Channel::new_public(name, parent, creator_id))
            .await?;
        self.tree.add(&channel)?;

        if !parent.is_nil() {
            self.record_event(
                parent,
                ChannelEventType::ChildCreated,
                event_detail! { "userId" => creator_id, "channelId" => channel.id },
            );
        }
        self.hub.publish(HubEvent::ChannelCreated {
            channel_id: channel.id,
            private: false,
        });
        tracing::info!(channel_id = %channel.id, creator_id = %creator_id, "公开频道已创建");
        Ok(channel)
    }

    pub async fn update_channel(&self, id: ChannelId, args: UpdateChannelArgs) -> DomainResult<()> {
        let _guard = self.op_lock.lock().await;
        let channel = self.get_channel(id).await?;
        if channel.is_dm_channel() {
            return Err(DomainError::InvalidChannel);
        }

        let mut args = args;
        let updater_id = args.updater_id;
        if args.topic.as_deref() == Some(channel.topic.as_str()) {
            args.topic = None;
        }
        if args.name.as_deref() == Some(channel.name.as_str()) {
            args.name = None;
        }
        if args.parent == Some(channel.parent_id) {
            args.parent = None;
        }
        if args.force_notification == Some(channel.is_forced) {
            args.force_notification = None;
        }
        let visibility = args
            .visibility
            .take()
            .filter(|visible| *visible != channel.is_visible);

        let mut events: Vec<(ChannelEventType, ChannelEventDetail)> = Vec::new();

        if let Some(topic) = &args.topic {
            if channel.is_archived() {
                return Err(DomainError::ChannelArchived);
            }
            events.push((
                ChannelEventType::TopicChanged,
                event_detail! { "userId" => updater_id, "before" => channel.topic, "after" => topic },
            ));
        }

        if let Some(force) = args.force_notification {
            events.push((
                ChannelEventType::ForcedNotificationChanged,
                event_detail! { "userId" => updater_id, "force" => force },
            ));
        }

        if args.is_structural() {
            let new_name = args.name.clone().unwrap_or_else(|| channel.name.clone());
            let new_parent = args.parent.unwrap_or(channel.parent_id);
            let case_only_rename =
                new_parent == channel.parent_id && new_name.eq_ignore_ascii_case(&channel.name);
            if !case_only_rename && self.tree.is_child_present(&new_name, new_parent) {
                return Err(DomainError::ChannelNameConflicts);
            }

            if let Some(name) = &args.name {
                ChannelName::parse(name.as_str())?;
                events.push((
                    ChannelEventType::NameChanged,
                    event_detail! { "userId" => updater_id, "before" => channel.name, "after" => name },
                ));
            }

            if let Some(parent) = args.parent {
                if !parent.is_nil() {
                    let parent_channel = self
                        .tree
                        .get_channel(parent)
                        .ok_or(DomainError::InvalidParentChannel)?;
                    if !channel.is_archived() && parent_channel.is_archived() {
                        return Err(DomainError::InvalidParentChannel);
                    }
                    let mut ascendants = self.tree.get_ascendant_ids(parent);
                    ascendants.push(parent);
                    if ascendants.contains(&id) {
                        return Err(DomainError::TooDeepChannel);
                    }
                    if ascendants.len() + self.tree.get_channel_depth(id) > self.max_depth {
                        return Err(DomainError::TooDeepChannel);
                    }
                }
                events.push((
                    ChannelEventType::ParentChanged,
                    event_detail! { "userId" => updater_id, "before" => channel.parent_id, "after" => parent },
                ));
            }
        }

        if !events.is_empty() {
            let updated = self.repo.update_channel(id, args.clone()).await?;
            if args.is_structural() {
                self.tree
                    .move_channel(id, args.parent, args.name.as_deref())?;
            }
            self.tree.update_single(&updated);

            for (event_type, detail) in events {
                self.record_event(id, event_type, detail);
            }
            self.publish_updated(id);
            if let Some(new_parent) = args.parent {
                if !channel.parent_id.is_nil() {
                    self.publish_updated(channel.parent_id);
                }
                if !new_parent.is_nil() {
                    self.publish_updated(new_parent);
                }
            }
            tracing::info!(channel_id = %id, updater_id = %updater_id, "频道已更新");
        }

        match visibility {
            Some(false) => self.archive_locked(id, updater_id).await,
            Some(true) => self.unarchive_locked(id, updater_id).await,
            None => Ok(()),
        }
    }

    /// 归档频道及其全部未归档的后代
    pub async fn archive_channel(&self, id: ChannelId, updater_id: UserId) -> DomainResult<()> {
        let _guard = self.op_lock.lock().await;
        self.archive_locked(id, updater_id).await
    }

    /// 只取消自身的归档，父频道必须未归档
    pub async fn unarchive_channel(&self, id: ChannelId, updater_id: UserId) -> DomainResult<()> {
        let _guard = self.op_lock.lock().await;
        self.unarchive_locked(id, updater_id).await
    }

    async fn archive_locked(&self, id: ChannelId, updater_id: UserId) -> DomainResult<()> {
        let channel = self.get_channel(id).await?;
        if channel.is_dm_channel() {
            return Err(DomainError::InvalidChannel);
        }
        if channel.is_archived() {
            return Ok(());
        }

        let mut targets = vec![id];
        let mut queue: VecDeque<ChannelId> = self.tree.get_children_ids(id).into();
        while let Some(child) = queue.pop_front() {
            if self.tree.is_archived_channel(child) {
                continue;
            }
            targets.push(child);
            queue.extend(self.tree.get_children_ids(child));
        }

        let archived = self.repo.archive_channels(targets, updater_id).await?;
        self.tree.update_multiple(&archived);
        for ch in &archived {
            self.record_event(
                ch.id,
                ChannelEventType::VisibilityChanged,
                event_detail! { "userId" => updater_id, "visibility" => false },
            );
            self.publish_updated(ch.id);
        }
        tracing::info!(channel_id = %id, archived = archived.len(), "频道已归档");
        Ok(())
    }

    async fn unarchive_locked(&self, id: ChannelId, updater_id: UserId) -> DomainResult<()> {
        let channel = self.get_channel(id).await?;
        if channel.is_dm_channel() {
            return Err(DomainError::InvalidChannel);
        }
        if !channel.is_archived() {
            return Ok(());
        }
        if !channel.parent_id.is_nil() && self.tree.is_archived_channel(channel.parent_id) {
            return Err(DomainError::InvalidParentChannel);
        }

        let mut args = UpdateChannelArgs::new(updater_id);
        args.visibility = Some(true);
        let updated = self.repo.update_channel(id, args).await?;
        self.tree.update_single(&updated);
        self.record_event(
            id,
            ChannelEventType::VisibilityChanged,
            event_detail! { "userId" => updater_id, "visibility" => true },
        );
        self.publish_updated(id);
        tracing::info!(channel_id = %id, "频道已取消归档");
        Ok(())
    }

    pub async fn change_channel_subscriptions(
        &self,
        id: ChannelId,
        subscriptions: HashMap<UserId, SubscriptionLevel>,
        keep_off_level: bool,
        updater_id: UserId,
    ) -> DomainResult<()> {
        let channel = self.get_channel(id).await?;
        if !channel.is_public {
            return Err(DomainError::InvalidChannel);
        }
        if channel.is_forced {
            return Err(DomainError::ForcedNotification);
        }

        let (on, off) = self
            .repo
            .change_channel_subscriptions(id, subscriptions, keep_off_level)
            .await?;
        if on.is_empty() && off.is_empty() {
            return Ok(());
        }

        self.record_event(
            id,
            ChannelEventType::SubscribersChanged,
            event_detail! { "userId" => updater_id, "on" => on, "off" => off },
        );
        let subscriber_ids = on.iter().chain(off.iter()).copied().collect();
        self.hub.publish(HubEvent::ChannelSubscribersChanged {
            channel_id: id,
            subscriber_ids,
        });
        Ok(())
    }

    pub async fn get_channel_subscriptions(
        &self,
        id: ChannelId,
    ) -> DomainResult<Vec<ChannelSubscription>> {
        Ok(self.repo.get_channel_subscriptions(id).await?)
    }

    /// 获取两人之间的私聊频道，不存在时创建
    pub async fn get_dm_channel(&self, user1: UserId, user2: UserId) -> DomainResult<Channel> {
        if user1.is_nil() || user2.is_nil() {
            return Err(DomainError::NotFound);
        }
        if let Some(channel) = self.repo.get_direct_message_channel(user1, user2).await? {
            return Ok(channel);
        }

        let _guard = self.op_lock.lock().await;
        if let Some(channel) = self.repo.get_direct_message_channel(user1, user2).await? {
            return Ok(channel);
        }
        let channel = self
            .repo
            .create_direct_message_channel(
                Channel::new_direct_message(random_dm_name()),
                user1,
                user2,
            )
            .await?;
        self.hub.publish(HubEvent::ChannelCreated {
            channel_id: channel.id,
            private: true,
        });
        tracing::info!(channel_id = %channel.id, user1 = %user1, user2 = %user2, "私聊频道已创建");
        Ok(channel)
    }

    /// 私聊频道 -> 对方用户
    pub async fn get_dm_channel_mapping(
        &self,
        user_id: UserId,
    ) -> DomainResult<HashMap<ChannelId, UserId>> {
        let mappings = self.repo.get_dm_channel_mappings(user_id).await?;
        Ok(mappings
            .into_iter()
            .map(|m| (m.channel_id, m.other(user_id)))
            .collect())
    }

    pub async fn get_private_channel_members(&self, id: ChannelId) -> DomainResult<Vec<UserId>> {
        Ok(self.repo.get_private_channel_member_ids(id).await?)
    }

    pub async fn is_channel_accessible_to_user(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> DomainResult<bool> {
        if self.tree.is_channel_present(channel_id) {
            return Ok(true);
        }
        Ok(self
            .repo
            .is_private_channel_member(channel_id, user_id)
            .await?)
    }

    pub fn is_public_channel(&self, id: ChannelId) -> bool {
        self.tree.is_channel_present(id)
    }

    pub fn get_channel_path_from_id(&self, id: ChannelId) -> String {
        self.tree.get_channel_path(id).unwrap_or_default()
    }

    pub fn get_channel_from_path(&self, path: &str) -> DomainResult<Channel> {
        self.tree
            .get_channel_id_from_path(path)
            .and_then(|id| self.tree.get_channel(id))
            .ok_or(DomainError::InvalidChannelPath)
    }

    pub fn public_channel_tree(&self) -> Arc<str> {
        self.tree.marshal_json()
    }

    /// 等待后台审计记录写完
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }

    fn publish_updated(&self, channel_id: ChannelId) {
        self.hub.publish(HubEvent::ChannelUpdated {
            channel_id,
            private: false,
        });
    }

    fn record_event(
        &self,
        channel_id: ChannelId,
        event_type: ChannelEventType,
        detail: ChannelEventDetail,
    ) {
        let repo = self.repo.clone();
        let event = ChannelEvent {
            channel_id,
            event_type,
            detail,
            date_time: Utc::now(),
        };
        self.tasks.spawn(async move {
            if let Err(err) = repo.record_channel_event(event).await {
                tracing::warn!(
                    channel_id = %channel_id,
                    event_type = %event_type,
                    error = %err,
                    "记录频道事件失败"
                );
            }
        });
    }
}

fn random_dm_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(DM_CHANNEL_NAME_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("dm_{suffix}")
}
