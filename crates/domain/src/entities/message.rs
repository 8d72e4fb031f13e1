//! 消息实体定义
//!
//! 包含消息本体、表情（スタンプ）以及置顶信息。

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::value_objects::{ChannelId, FileId, GroupId, MessageId, StampId, Timestamp, UserId};

/// 消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub text: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub stamps: Vec<MessageStamp>,
    #[serde(default)]
    pub pin: Option<Pin>,
}

impl Message {
    pub fn new(user_id: UserId, channel_id: ChannelId, text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MessageId::generate(),
            user_id,
            channel_id,
            text: text.into(),
            created_at: now,
            updated_at: now,
            deleted: false,
            stamps: Vec::new(),
            pin: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }
}

/// 消息上的表情记录，自然键为 (message_id, stamp_id, user_id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStamp {
    pub message_id: MessageId,
    pub stamp_id: StampId,
    pub user_id: UserId,
    /// 始终 >= 1
    pub count: u32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 置顶
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub created_at: Timestamp,
}

/// 消息正文解析结果：纯文本与内嵌引用
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub plain_text: String,
    pub mentions: Vec<UserId>,
    pub group_mentions: Vec<GroupId>,
    pub channel_links: Vec<ChannelId>,
    pub attachments: Vec<FileId>,
    pub citations: Vec<MessageId>,
}

impl ParsedMessage {
    /// 将纯文本压成一行
    pub fn one_line(&self) -> String {
        self.plain_text.replace('\n', " ")
    }
}
