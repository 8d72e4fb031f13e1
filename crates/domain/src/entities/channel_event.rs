//! 频道审计事件
//!
//! 频道与置顶的变更以类型 + 详情 JSON 的形式记录，记录失败不影响变更本身。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value_objects::{ChannelId, Timestamp};

/// 审计事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelEventType {
    TopicChanged,
    SubscribersChanged,
    PinAdded,
    PinRemoved,
    NameChanged,
    ParentChanged,
    VisibilityChanged,
    ForcedNotificationChanged,
    ChildCreated,
}

impl ChannelEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopicChanged => "TopicChanged",
            Self::SubscribersChanged => "SubscribersChanged",
            Self::PinAdded => "PinAdded",
            Self::PinRemoved => "PinRemoved",
            Self::NameChanged => "NameChanged",
            Self::ParentChanged => "ParentChanged",
            Self::VisibilityChanged => "VisibilityChanged",
            Self::ForcedNotificationChanged => "ForcedNotificationChanged",
            Self::ChildCreated => "ChildCreated",
        }
    }
}

impl std::fmt::Display for ChannelEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 审计事件详情
pub type ChannelEventDetail = Map<String, Value>;

/// 一条审计记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel_id: ChannelId,
    pub event_type: ChannelEventType,
    pub detail: ChannelEventDetail,
    pub date_time: Timestamp,
}

/// 以 `key => value` 形式构造审计详情
#[macro_export]
macro_rules! event_detail {
    ($($key:literal => $value:expr),* $(,)?) => {{
        let mut detail = $crate::ChannelEventDetail::new();
        $(
            detail.insert($key.to_string(), $crate::__serde_json::json!($value));
        )*
        detail
    }};
}
