//! 频道浏览状态与 WebRTC 会话状态

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChannelId, Timestamp, UserId};

/// 浏览状态，按 None < StaleViewing < Monitoring < Editing 排序
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ViewState {
    /// 后台打开
    #[default]
    None,
    /// 打开但长时间未操作
    StaleViewing,
    /// 正在查看消息
    Monitoring,
    /// 正在输入
    Editing,
}

impl ViewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::StaleViewing => "stale_viewing",
            Self::Monitoring => "monitoring",
            Self::Editing => "editing",
        }
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewState {
    type Err = DomainError;

    /// 大小写不敏感
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "stale_viewing" => Ok(Self::StaleViewing),
            "monitoring" => Ok(Self::Monitoring),
            "editing" => Ok(Self::Editing),
            _ => Err(DomainError::invalid_argument("view_state", s)),
        }
    }
}

/// 频道内某个用户的聚合浏览状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateWithTime {
    pub state: ViewState,
    pub time: Timestamp,
}

/// 某个连接的浏览状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateWithChannel {
    pub state: ViewState,
    pub channel_id: ChannelId,
}

/// 频道浏览者快照：user -> (该用户所有连接中最高的状态, 更新时间)
pub type ChannelViewers = HashMap<UserId, StateWithTime>;

/// 推送给客户端的浏览者条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelViewerEntry {
    pub user_id: UserId,
    pub state: ViewState,
    pub updated_at: Timestamp,
}

/// 将浏览者快照展开为数组，按 user_id 排序保证输出稳定
pub fn viewers_to_entries(viewers: &ChannelViewers) -> Vec<ChannelViewerEntry> {
    let mut entries: Vec<ChannelViewerEntry> = viewers
        .iter()
        .map(|(user_id, s)| ChannelViewerEntry {
            user_id: *user_id,
            state: s.state,
            updated_at: s.time,
        })
        .collect();
    entries.sort_by_key(|e| e.user_id);
    entries
}

/// 用户的 WebRTC 状态：session_id -> state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWebRtcState {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub sessions: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_state_parses_case_insensitively() {
        assert_eq!("Monitoring".parse::<ViewState>(), Ok(ViewState::Monitoring));
        assert_eq!("EDITING".parse::<ViewState>(), Ok(ViewState::Editing));
        assert_eq!(
            "stale_viewing".parse::<ViewState>(),
            Ok(ViewState::StaleViewing)
        );
        assert!("watching".parse::<ViewState>().is_err());
    }

    #[test]
    fn view_state_order() {
        assert!(ViewState::Editing > ViewState::Monitoring);
        assert!(ViewState::Monitoring > ViewState::StaleViewing);
        assert!(ViewState::StaleViewing > ViewState::None);
    }
}
