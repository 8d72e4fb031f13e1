//! WebSocket 会话注册表与定向投递

use std::collections::HashMap;
use std::sync::Arc;

use domain::{DomainError, DomainResult, HubEvent, UserId};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::command::{self, Command};
use super::session::{Outbound, Session};
use super::target::Target;
use crate::hub::Hub;
use crate::viewer::ViewerManager;
use crate::webrtc::WebRtcManager;

/// 服务重启
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// 不支持的数据
pub const CLOSE_UNSUPPORTED: u16 = 1011;

const RTC_LOCKED: &str = "your webrtc state is locked by another ws connection";

/// `{type, body}` 形式的文本帧
pub fn frame(kind: &str, body: &Value) -> String {
    json!({ "type": kind, "body": body }).to_string()
}

pub fn error_frame(message: &str) -> String {
    frame("ERROR", &Value::String(message.to_string()))
}

#[derive(Default)]
struct Registry {
    closed: bool,
    sessions: HashMap<String, Arc<Session>>,
}

pub struct Streamer {
    hub: Arc<Hub>,
    viewers: Arc<ViewerManager>,
    webrtc: Arc<WebRtcManager>,
    registry: RwLock<Registry>,
    buffer_size: usize,
}

impl Streamer {
    pub fn new(
        hub: Arc<Hub>,
        viewers: Arc<ViewerManager>,
        webrtc: Arc<WebRtcManager>,
        buffer_size: usize,
    ) -> Self {
        Self {
            hub,
            viewers,
            webrtc,
            registry: RwLock::new(Registry::default()),
            buffer_size,
        }
    }

    /// 登记新会话，返回会话和出站队列的接收端
    pub fn open_session(
        &self,
        user_id: UserId,
    ) -> DomainResult<(Arc<Session>, mpsc::Receiver<Outbound>)> {
        let (session, receiver) = Session::new(user_id, self.buffer_size);
        {
            let mut registry = self.registry.write();
            if registry.closed {
                return Err(DomainError::AlreadyClosed);
            }
            registry
                .sessions
                .insert(session.key().to_string(), session.clone());
        }
        self.hub.publish(HubEvent::WsConnected { user_id });
        tracing::info!(user_id = %user_id, session = session.key(), "WebSocket 会话已建立");
        Ok((session, receiver))
    }

    /// 处理一条文本命令，出错时回写 ERROR 帧，连接保持
    pub fn handle_command(&self, session: &Session, text: &str) {
        let command = match command::parse(text) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(session = session.key(), error = %err, "无法解析的命令");
                self.reply_error(session, &err.to_string());
                return;
            }
        };

        match command {
            Command::ClearViewState => {
                session.set_view_state(None);
                self.viewers.remove_viewer(session.key());
            }
            Command::SetViewState { channel_id, state } => {
                session.set_view_state(Some((channel_id, state)));
                self.viewers.set_viewer(
                    session.key(),
                    session.key(),
                    session.user_id(),
                    channel_id,
                    state,
                );
            }
            Command::ResetRtcState => {
                if self
                    .webrtc
                    .reset_state(session.key(), session.user_id())
                    .is_err()
                {
                    self.reply_error(session, RTC_LOCKED);
                }
            }
            Command::SetRtcState {
                channel_id,
                sessions,
            } => {
                if self
                    .webrtc
                    .set_state(session.key(), session.user_id(), channel_id, sessions)
                    .is_err()
                {
                    self.reply_error(session, RTC_LOCKED);
                }
            }
            Command::TimelineStreaming(enabled) => session.set_timeline_streaming(enabled),
        }
    }

    /// 连接结束时调用：清理浏览状态与通话状态，然后注销
    pub fn close_session(&self, session: &Session) {
        session.mark_closed();
        self.viewers.remove_viewer(session.key());
        let _ = self.webrtc.reset_state(session.key(), session.user_id());
        self.hub.publish(HubEvent::WsDisconnected {
            user_id: session.user_id(),
        });
        self.registry.write().sessions.remove(session.key());
        tracing::info!(user_id = %session.user_id(), session = session.key(), "WebSocket 会话已关闭");
    }

    /// 向匹配 `target` 的会话投递，返回成功入队的会话数；队列满的会话丢弃该消息
    pub fn write_message(&self, kind: &str, body: &Value, target: &Target) -> usize {
        let text = frame(kind, body);
        let registry = self.registry.read();
        let mut delivered = 0;
        for session in registry.sessions.values() {
            if !target.matches(session) {
                continue;
            }
            match session.write_message(Outbound::Text(text.clone())) {
                Ok(()) => delivered += 1,
                Err(DomainError::BufferFull) => {
                    tracing::warn!(
                        kind,
                        user_id = %session.user_id(),
                        session = session.key(),
                        "会话发送队列已满，丢弃消息"
                    );
                }
                Err(_) => {}
            }
        }
        delivered
    }

    /// 停止接收新连接，并通知所有会话关闭
    pub fn shutdown(&self) -> DomainResult<usize> {
        let mut registry = self.registry.write();
        if registry.closed {
            return Err(DomainError::AlreadyClosed);
        }
        registry.closed = true;
        let mut notified = 0;
        for session in registry.sessions.values() {
            let close = Outbound::Close {
                code: CLOSE_SERVICE_RESTART,
                reason: "Server is stopping...".to_string(),
            };
            if session.write_message(close).is_ok() {
                notified += 1;
            }
        }
        tracing::info!(sessions = registry.sessions.len(), "WebSocket streamer 正在关闭");
        Ok(notified)
    }

    pub fn is_closed(&self) -> bool {
        self.registry.read().closed
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().sessions.len()
    }

    fn reply_error(&self, session: &Session, message: &str) {
        if let Err(err) = session.write_message(Outbound::Text(error_frame(message))) {
            tracing::debug!(session = session.key(), error = %err, "ERROR 帧未能入队");
        }
    }
}
