//! 频道实体定义
//!
//! 公开频道组成一棵树（父节点为 nil 表示顶层），私聊频道挂在虚拟的 DM 根下。

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::value_objects::{ChannelId, Timestamp, UserId};

/// 频道
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// nil 表示顶层公开频道，[`ChannelId::DM_ROOT`] 表示私聊频道
    pub parent_id: ChannelId,
    pub topic: String,
    pub is_public: bool,
    /// false 表示已归档
    pub is_visible: bool,
    /// 强制通知频道
    pub is_forced: bool,
    pub creator_id: UserId,
    pub updater_id: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Channel {
    /// 构造新的公开频道
    pub fn new_public(name: impl Into<String>, parent_id: ChannelId, creator_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ChannelId::generate(),
            name: name.into(),
            parent_id,
            topic: String::new(),
            is_public: true,
            is_visible: true,
            is_forced: false,
            creator_id,
            updater_id: creator_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// 构造新的私聊频道
    pub fn new_direct_message(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ChannelId::generate(),
            name: name.into(),
            parent_id: ChannelId::DM_ROOT,
            topic: String::new(),
            is_public: false,
            is_visible: true,
            is_forced: false,
            creator_id: UserId::nil(),
            updater_id: UserId::nil(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_archived(&self) -> bool {
        !self.is_visible
    }

    pub fn is_dm_channel(&self) -> bool {
        self.parent_id.is_dm_root()
    }
}

/// 频道更新参数，`None` 表示不修改
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateChannelArgs {
    pub updater_id: UserId,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub visibility: Option<bool>,
    pub force_notification: Option<bool>,
    /// nil 表示移动到顶层
    pub parent: Option<ChannelId>,
}

impl UpdateChannelArgs {
    pub fn new(updater_id: UserId) -> Self {
        Self {
            updater_id,
            ..Default::default()
        }
    }

    pub fn is_structural(&self) -> bool {
        self.name.is_some() || self.parent.is_some()
    }
}

/// 频道订阅级别
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionLevel {
    #[default]
    None,
    /// 仅标记未读
    Mark,
    /// 标记未读并通知
    MarkAndNotify,
}

impl SubscriptionLevel {
    pub fn marks(&self) -> bool {
        *self >= SubscriptionLevel::Mark
    }

    pub fn notifies(&self) -> bool {
        *self == SubscriptionLevel::MarkAndNotify
    }
}

/// 用户对频道的订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSubscription {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub level: SubscriptionLevel,
}

/// 私聊频道与两端用户的映射
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmChannelMapping {
    pub channel_id: ChannelId,
    pub user1: UserId,
    pub user2: UserId,
}

impl DmChannelMapping {
    /// 返回相对于 `user_id` 的另一端
    pub fn other(&self, user_id: UserId) -> UserId {
        if self.user1 != user_id {
            self.user1
        } else {
            self.user2
        }
    }
}
