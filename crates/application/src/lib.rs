//! 应用层实现。
//!
//! 事件总线、频道与消息管理、浏览状态、实时推送以及通知扇出都在这里，
//! 持久化通过 [`repository`] 中的 trait 交给基础设施层。

pub mod channel;
pub mod clock;
pub mod counter;
pub mod error;
pub mod hub;
pub mod message;
pub mod notification;
pub mod push;
pub mod realtime;
pub mod repository;
pub mod tasks;
pub mod throttle;
pub mod viewer;
pub mod webrtc;

pub use channel::{ChannelManager, ChannelTree};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{Counters, RealtimeStats};
pub use error::ApplicationError;
pub use hub::{Hub, Subscription};
pub use message::{MessageManager, MessageParser};
pub use notification::{NotificationDependencies, NotificationService};
pub use push::{Payload, PushClient, PushMessage, PushProvider, SendResponse};
pub use realtime::{BotStreamer, SseEvent, SseStreamer, SseSubscription, Streamer};
pub use repository::{
    ChannelRepository, DeviceRepository, FileRepository, MessageRepository, UnreadRepository,
    UserRepository,
};
pub use tasks::TaskTracker;
pub use throttle::StampThrottler;
pub use viewer::ViewerManager;
pub use webrtc::WebRtcManager;
