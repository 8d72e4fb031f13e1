//! 设备令牌与文件元信息

use serde::{Deserialize, Serialize};

use crate::value_objects::{FileId, Timestamp, UserId};

/// 推送目标设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlatform {
    #[default]
    Android,
    Ios,
    Web,
}

/// 设备令牌，上游报告 unregistered 时删除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub user_id: UserId,
    pub token: String,
    pub platform: DevicePlatform,
    pub created_at: Timestamp,
}

/// 文件元信息，推送时用于取缩略图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: FileId,
    pub name: String,
    pub mime: String,
    pub has_thumbnail: bool,
}
