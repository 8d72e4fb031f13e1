//! 用户实体定义
//!
//! 实时推送核心只关心用户的展示名、状态与通知偏好。

use serde::{Deserialize, Serialize};

use crate::value_objects::{FileId, GroupId, UserId};

/// 用户账号状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Deactivated,
    #[default]
    Active,
    Suspended,
}

/// 用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub display_name: String,
    pub status: UserStatus,
    pub bot: bool,
    pub icon_file_id: Option<FileId>,
    /// 自己的消息被引用时是否推送通知
    #[serde(default)]
    pub notify_citation: bool,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::generate(),
            name: name.into(),
            display_name: String::new(),
            status: UserStatus::Active,
            bot: false,
            icon_file_id: None,
            notify_citation: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// 展示名为空时退回到用户名
    pub fn response_display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// 用户组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<UserId>,
}
