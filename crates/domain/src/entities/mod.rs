//! 领域实体定义
//!
//! 包含实时推送核心涉及的实体：频道、消息、用户、设备令牌、未读、审计事件、浏览状态。

pub mod channel;
pub mod channel_event;
pub mod device;
pub mod message;
pub mod presence;
pub mod unread;
pub mod user;

// 重新导出核心实体
pub use channel::{Channel, ChannelSubscription, DmChannelMapping, SubscriptionLevel, UpdateChannelArgs};
pub use channel_event::{ChannelEvent, ChannelEventDetail, ChannelEventType};
pub use device::{DevicePlatform, DeviceToken, FileMeta};
pub use message::{Message, MessageStamp, ParsedMessage, Pin};
pub use presence::{
    viewers_to_entries, ChannelViewerEntry, ChannelViewers, StateWithChannel, StateWithTime,
    UserWebRtcState, ViewState,
};
pub use unread::Unread;
pub use user::{User, UserGroup, UserStatus};
