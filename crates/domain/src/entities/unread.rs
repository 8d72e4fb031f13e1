//! 未读记录

use serde::{Deserialize, Serialize};

use crate::value_objects::{ChannelId, MessageId, Timestamp, UserId};

/// 用户对某条消息的未读记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unread {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    /// 客户端需要强调显示
    pub noticeable: bool,
    pub message_created_at: Timestamp,
}
