//! 单个 WebSocket 会话
//!
//! 会话只持有出站队列的发送端，真正的读写循环在传输层。

use std::sync::Arc;

use domain::{ChannelId, DomainError, DomainResult, UserId, ViewState};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// 出站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Default)]
struct SessionState {
    closed: bool,
    view_state: Option<(ChannelId, ViewState)>,
    timeline_streaming: bool,
}

pub struct Session {
    key: String,
    user_id: UserId,
    sender: mpsc::Sender<Outbound>,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(user_id: UserId, buffer: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let session = Arc::new(Self {
            key: Uuid::new_v4().simple().to_string(),
            user_id,
            sender,
            state: RwLock::new(SessionState::default()),
        });
        (session, receiver)
    }

    /// 会话 key，同时作为 WebRTC 状态的 conn key
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn view_state(&self) -> Option<(ChannelId, ViewState)> {
        self.state.read().view_state
    }

    pub fn timeline_streaming(&self) -> bool {
        self.state.read().timeline_streaming
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// 非阻塞入队：队列满返回 [`DomainError::BufferFull`]，已关闭返回 [`DomainError::AlreadyClosed`]
    pub fn write_message(&self, message: Outbound) -> DomainResult<()> {
        if self.is_closed() {
            return Err(DomainError::AlreadyClosed);
        }
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DomainError::BufferFull),
            Err(TrySendError::Closed(_)) => Err(DomainError::AlreadyClosed),
        }
    }

    pub(crate) fn set_view_state(&self, view_state: Option<(ChannelId, ViewState)>) {
        self.state.write().view_state = view_state;
    }

    pub(crate) fn set_timeline_streaming(&self, enabled: bool) {
        self.state.write().timeline_streaming = enabled;
    }

    pub(crate) fn mark_closed(&self) {
        self.state.write().closed = true;
    }
}
