use std::collections::HashMap;
use std::fmt;

use crate::entities::{
    ChannelViewers, Message, MessageStamp, ParsedMessage, StateWithChannel, Unread,
};
use crate::value_objects::{
    ChannelId, ClipFolderId, FileId, GroupId, MessageId, StampId, StampPaletteId, TagId,
    Timestamp, UserId,
};

/// 事件主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    MessagePinned,
    MessageUnpinned,
    MessageStamped,
    MessageUnstamped,
    MessageStampsUpdated,
    MessageCited,
    MessageUnread,
    ChannelCreated,
    ChannelUpdated,
    ChannelDeleted,
    ChannelStared,
    ChannelUnstared,
    ChannelRead,
    ChannelViewersChanged,
    ChannelSubscribersChanged,
    UserCreated,
    UserUpdated,
    UserIconUpdated,
    UserOnline,
    UserOffline,
    UserViewStateChanged,
    UserTagsUpdated,
    UserGroupCreated,
    UserGroupUpdated,
    UserGroupDeleted,
    UserGroupMemberAdded,
    UserGroupMemberRemoved,
    UserGroupAdminAdded,
    UserGroupAdminRemoved,
    StampCreated,
    StampUpdated,
    StampDeleted,
    StampPaletteCreated,
    StampPaletteUpdated,
    StampPaletteDeleted,
    ClipFolderCreated,
    ClipFolderUpdated,
    ClipFolderDeleted,
    ClipFolderMessageAdded,
    ClipFolderMessageDeleted,
    UserWebRtcStateChanged,
    WsConnected,
    WsDisconnected,
    BotWsConnected,
    BotWsDisconnected,
    SseConnected,
    SseDisconnected,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message.created",
            Self::MessageUpdated => "message.updated",
            Self::MessageDeleted => "message.deleted",
            Self::MessagePinned => "message.pinned",
            Self::MessageUnpinned => "message.unpinned",
            Self::MessageStamped => "message.stamped",
            Self::MessageUnstamped => "message.unstamped",
            Self::MessageStampsUpdated => "message.stamps.updated",
            Self::MessageCited => "message.cited",
            Self::MessageUnread => "message.unread",
            Self::ChannelCreated => "channel.created",
            Self::ChannelUpdated => "channel.updated",
            Self::ChannelDeleted => "channel.deleted",
            Self::ChannelStared => "channel.stared",
            Self::ChannelUnstared => "channel.unstared",
            Self::ChannelRead => "channel.read",
            Self::ChannelViewersChanged => "channel.viewers_changed",
            Self::ChannelSubscribersChanged => "channel.subscribers_changed",
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::UserIconUpdated => "user.icon_updated",
            Self::UserOnline => "user.online",
            Self::UserOffline => "user.offline",
            Self::UserViewStateChanged => "user.viewstate.changed",
            Self::UserTagsUpdated => "user_tag.updated",
            Self::UserGroupCreated => "user_group.created",
            Self::UserGroupUpdated => "user_group.updated",
            Self::UserGroupDeleted => "user_group.deleted",
            Self::UserGroupMemberAdded => "user_group.member.added",
            Self::UserGroupMemberRemoved => "user_group.member.removed",
            Self::UserGroupAdminAdded => "user_group.admin.added",
            Self::UserGroupAdminRemoved => "user_group.admin.removed",
            Self::StampCreated => "stamp.created",
            Self::StampUpdated => "stamp.updated",
            Self::StampDeleted => "stamp.deleted",
            Self::StampPaletteCreated => "stamp_palette.created",
            Self::StampPaletteUpdated => "stamp_palette.updated",
            Self::StampPaletteDeleted => "stamp_palette.deleted",
            Self::ClipFolderCreated => "clip_folder.created",
            Self::ClipFolderUpdated => "clip_folder.updated",
            Self::ClipFolderDeleted => "clip_folder.deleted",
            Self::ClipFolderMessageAdded => "clip_folder_message.added",
            Self::ClipFolderMessageDeleted => "clip_folder_message.deleted",
            Self::UserWebRtcStateChanged => "user.webrtc_v3.state_changed",
            Self::WsConnected => "ws.connected",
            Self::WsDisconnected => "ws.disconnected",
            Self::BotWsConnected => "bot.ws.connected",
            Self::BotWsDisconnected => "bot.ws.disconnected",
            Self::SseConnected => "sse.connected",
            Self::SseDisconnected => "sse.disconnected",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 事件总线上的事件
#[derive(Debug, Clone)]
pub enum HubEvent {
    MessageCreated {
        message: Message,
        parsed: ParsedMessage,
    },
    MessageUpdated {
        message: Message,
        old_message: Message,
    },
    MessageDeleted {
        message: Message,
        deleted_unreads: Vec<Unread>,
    },
    MessagePinned {
        message_id: MessageId,
        channel_id: ChannelId,
    },
    MessageUnpinned {
        message_id: MessageId,
        channel_id: ChannelId,
    },
    MessageStamped {
        message_id: MessageId,
        user_id: UserId,
        stamp_id: StampId,
        count: u32,
        created_at: Timestamp,
    },
    MessageUnstamped {
        message_id: MessageId,
        user_id: UserId,
        stamp_id: StampId,
    },
    /// 节流后的表情变化
    MessageStampsUpdated {
        message_id: MessageId,
        stamps: Vec<MessageStamp>,
    },
    MessageCited {
        message: Message,
        cited_ids: Vec<MessageId>,
    },
    MessageUnread {
        message_id: MessageId,
        channel_id: ChannelId,
        user_id: UserId,
        noticeable: bool,
    },
    ChannelCreated {
        channel_id: ChannelId,
        private: bool,
    },
    ChannelUpdated {
        channel_id: ChannelId,
        private: bool,
    },
    ChannelDeleted {
        channel_id: ChannelId,
        private: bool,
    },
    ChannelStared {
        user_id: UserId,
        channel_id: ChannelId,
    },
    ChannelUnstared {
        user_id: UserId,
        channel_id: ChannelId,
    },
    ChannelRead {
        user_id: UserId,
        channel_id: ChannelId,
        read_messages_num: u64,
    },
    ChannelViewersChanged {
        channel_id: ChannelId,
        viewers: ChannelViewers,
    },
    ChannelSubscribersChanged {
        channel_id: ChannelId,
        subscriber_ids: Vec<UserId>,
    },
    UserCreated {
        user_id: UserId,
    },
    UserUpdated {
        user_id: UserId,
    },
    UserIconUpdated {
        user_id: UserId,
        file_id: FileId,
    },
    UserOnline {
        user_id: UserId,
    },
    UserOffline {
        user_id: UserId,
        datetime: Timestamp,
    },
    /// conn_key -> (state, channel)
    UserViewStateChanged {
        user_id: UserId,
        view_states: HashMap<String, StateWithChannel>,
    },
    UserTagsUpdated {
        user_id: UserId,
        tag_id: TagId,
    },
    UserGroupCreated {
        group_id: GroupId,
    },
    UserGroupUpdated {
        group_id: GroupId,
    },
    UserGroupDeleted {
        group_id: GroupId,
    },
    UserGroupMemberAdded {
        group_id: GroupId,
        user_id: UserId,
    },
    UserGroupMemberRemoved {
        group_id: GroupId,
        user_id: UserId,
    },
    UserGroupAdminAdded {
        group_id: GroupId,
        user_id: UserId,
    },
    UserGroupAdminRemoved {
        group_id: GroupId,
        user_id: UserId,
    },
    StampCreated {
        stamp_id: StampId,
    },
    StampUpdated {
        stamp_id: StampId,
    },
    StampDeleted {
        stamp_id: StampId,
    },
    StampPaletteCreated {
        user_id: UserId,
        stamp_palette_id: StampPaletteId,
    },
    StampPaletteUpdated {
        user_id: UserId,
        stamp_palette_id: StampPaletteId,
    },
    StampPaletteDeleted {
        user_id: UserId,
        stamp_palette_id: StampPaletteId,
    },
    ClipFolderCreated {
        user_id: UserId,
        clip_folder_id: ClipFolderId,
    },
    ClipFolderUpdated {
        user_id: UserId,
        clip_folder_id: ClipFolderId,
    },
    ClipFolderDeleted {
        user_id: UserId,
        clip_folder_id: ClipFolderId,
    },
    ClipFolderMessageAdded {
        user_id: UserId,
        clip_folder_id: ClipFolderId,
        message_id: MessageId,
    },
    ClipFolderMessageDeleted {
        user_id: UserId,
        clip_folder_id: ClipFolderId,
        message_id: MessageId,
    },
    /// sessions: session_id -> state，空表示退出通话
    UserWebRtcStateChanged {
        user_id: UserId,
        channel_id: ChannelId,
        sessions: HashMap<String, String>,
    },
    WsConnected {
        user_id: UserId,
    },
    WsDisconnected {
        user_id: UserId,
    },
    BotWsConnected {
        user_id: UserId,
    },
    BotWsDisconnected {
        user_id: UserId,
    },
    SseConnected {
        user_id: UserId,
    },
    SseDisconnected {
        user_id: UserId,
    },
}

impl HubEvent {
    pub fn topic(&self) -> Topic {
        match self {
            Self::MessageCreated { .. } => Topic::MessageCreated,
            Self::MessageUpdated { .. } => Topic::MessageUpdated,
            Self::MessageDeleted { .. } => Topic::MessageDeleted,
            Self::MessagePinned { .. } => Topic::MessagePinned,
            Self::MessageUnpinned { .. } => Topic::MessageUnpinned,
            Self::MessageStamped { .. } => Topic::MessageStamped,
            Self::MessageUnstamped { .. } => Topic::MessageUnstamped,
            Self::MessageStampsUpdated { .. } => Topic::MessageStampsUpdated,
            Self::MessageCited { .. } => Topic::MessageCited,
            Self::MessageUnread { .. } => Topic::MessageUnread,
            Self::ChannelCreated { .. } => Topic::ChannelCreated,
            Self::ChannelUpdated { .. } => Topic::ChannelUpdated,
            Self::ChannelDeleted { .. } => Topic::ChannelDeleted,
            Self::ChannelStared { .. } => Topic::ChannelStared,
            Self::ChannelUnstared { .. } => Topic::ChannelUnstared,
            Self::ChannelRead { .. } => Topic::ChannelRead,
            Self::ChannelViewersChanged { .. } => Topic::ChannelViewersChanged,
            Self::ChannelSubscribersChanged { .. } => Topic::ChannelSubscribersChanged,
            Self::UserCreated { .. } => Topic::UserCreated,
            Self::UserUpdated { .. } => Topic::UserUpdated,
            Self::UserIconUpdated { .. } => Topic::UserIconUpdated,
            Self::UserOnline { .. } => Topic::UserOnline,
            Self::UserOffline { .. } => Topic::UserOffline,
            Self::UserViewStateChanged { .. } => Topic::UserViewStateChanged,
            Self::UserTagsUpdated { .. } => Topic::UserTagsUpdated,
            Self::UserGroupCreated { .. } => Topic::UserGroupCreated,
            Self::UserGroupUpdated { .. } => Topic::UserGroupUpdated,
            Self::UserGroupDeleted { .. } => Topic::UserGroupDeleted,
            Self::UserGroupMemberAdded { .. } => Topic::UserGroupMemberAdded,
            Self::UserGroupMemberRemoved { .. } => Topic::UserGroupMemberRemoved,
            Self::UserGroupAdminAdded { .. } => Topic::UserGroupAdminAdded,
            Self::UserGroupAdminRemoved { .. } => Topic::UserGroupAdminRemoved,
            Self::StampCreated { .. } => Topic::StampCreated,
            Self::StampUpdated { .. } => Topic::StampUpdated,
            Self::StampDeleted { .. } => Topic::StampDeleted,
            Self::StampPaletteCreated { .. } => Topic::StampPaletteCreated,
            Self::StampPaletteUpdated { .. } => Topic::StampPaletteUpdated,
            Self::StampPaletteDeleted { .. } => Topic::StampPaletteDeleted,
            Self::ClipFolderCreated { .. } => Topic::ClipFolderCreated,
            Self::ClipFolderUpdated { .. } => Topic::ClipFolderUpdated,
            Self::ClipFolderDeleted { .. } => Topic::ClipFolderDeleted,
            Self::ClipFolderMessageAdded { .. } => Topic::ClipFolderMessageAdded,
            Self::ClipFolderMessageDeleted { .. } => Topic::ClipFolderMessageDeleted,
            Self::UserWebRtcStateChanged { .. } => Topic::UserWebRtcStateChanged,
            Self::WsConnected { .. } => Topic::WsConnected,
            Self::WsDisconnected { .. } => Topic::WsDisconnected,
            Self::BotWsConnected { .. } => Topic::BotWsConnected,
            Self::BotWsDisconnected { .. } => Topic::BotWsDisconnected,
            Self::SseConnected { .. } => Topic::SseConnected,
            Self::SseDisconnected { .. } => Topic::SseDisconnected,
        }
    }
}
