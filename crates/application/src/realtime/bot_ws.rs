//! Bot 用 WebSocket 推送
//!
//! 会话按 bot 用户分组，事件只投递给指定 bot 的全部会话。只接受 `rtcstate` 命令。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{DomainError, DomainResult, HubEvent, UserId};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::ws::command::{self, Command};
use super::ws::{error_frame, Outbound, Session, CLOSE_SERVICE_RESTART};
use crate::hub::Hub;
use crate::webrtc::WebRtcManager;

#[derive(Default)]
struct Registry {
    closed: bool,
    sessions: HashMap<UserId, Vec<Arc<Session>>>,
}

pub struct BotStreamer {
    hub: Arc<Hub>,
    webrtc: Arc<WebRtcManager>,
    registry: RwLock<Registry>,
    buffer_size: usize,
}

impl BotStreamer {
    pub fn new(hub: Arc<Hub>, webrtc: Arc<WebRtcManager>, buffer_size: usize) -> Self {
        Self {
            hub,
            webrtc,
            registry: RwLock::new(Registry::default()),
            buffer_size,
        }
    }

    pub fn open_session(
        &self,
        bot_user_id: UserId,
    ) -> DomainResult<(Arc<Session>, mpsc::Receiver<Outbound>)> {
        let (session, receiver) = Session::new(bot_user_id, self.buffer_size);
        {
            let mut registry = self.registry.write();
            if registry.closed {
                return Err(DomainError::AlreadyClosed);
            }
            registry
                .sessions
                .entry(bot_user_id)
                .or_default()
                .push(session.clone());
        }
        self.hub.publish(HubEvent::BotWsConnected {
            user_id: bot_user_id,
        });
        tracing::info!(user_id = %bot_user_id, "Bot WebSocket 会话已建立");
        Ok((session, receiver))
    }

    pub fn handle_command(&self, session: &Session, text: &str) {
        let result = match command::parse(text) {
            Ok(Command::ResetRtcState) => self
                .webrtc
                .reset_state(session.key(), session.user_id())
                .map_err(|_| "your webrtc state is locked by another ws connection".to_string()),
            Ok(Command::SetRtcState {
                channel_id,
                sessions,
            }) => self
                .webrtc
                .set_state(session.key(), session.user_id(), channel_id, sessions)
                .map_err(|_| "your webrtc state is locked by another ws connection".to_string()),
            Ok(_) => Err(format!("unsupported command: {}", text.trim())),
            Err(err) => Err(err.to_string()),
        };
        if let Err(message) = result {
            let _ = session.write_message(Outbound::Text(error_frame(&message)));
        }
    }

    pub fn close_session(&self, session: &Session) {
        session.mark_closed();
        let _ = self.webrtc.reset_state(session.key(), session.user_id());
        self.hub.publish(HubEvent::BotWsDisconnected {
            user_id: session.user_id(),
        });

        let mut registry = self.registry.write();
        if let Some(sessions) = registry.sessions.get_mut(&session.user_id()) {
            sessions.retain(|s| s.key() != session.key());
            if sessions.is_empty() {
                registry.sessions.remove(&session.user_id());
            }
        }
    }

    /// 向 bot 的全部会话写入 `{type, reqId, body}`；
    /// 返回各会话的写入错误，以及是否存在可投递的会话
    pub fn write_message(
        &self,
        kind: &str,
        request_id: Uuid,
        body: &Value,
        bot_user_id: UserId,
    ) -> (Vec<DomainError>, bool) {
        let text = json!({ "type": kind, "reqId": request_id, "body": body }).to_string();
        let registry = self.registry.read();
        let mut errors = Vec::new();
        let mut attempted = false;
        for session in registry.sessions.get(&bot_user_id).into_iter().flatten() {
            attempted = true;
            if let Err(err) = session.write_message(Outbound::Text(text.clone())) {
                if err == DomainError::BufferFull {
                    tracing::warn!(kind, request_id = %request_id, user_id = %bot_user_id, "Bot 会话发送队列已满，丢弃消息");
                }
                errors.push(err);
            }
        }
        (errors, attempted)
    }

    pub fn shutdown(&self) -> DomainResult<()> {
        let mut registry = self.registry.write();
        if registry.closed {
            return Err(DomainError::AlreadyClosed);
        }
        registry.closed = true;
        for session in registry.sessions.values().flatten() {
            let _ = session.write_message(Outbound::Close {
                code: CLOSE_SERVICE_RESTART,
                reason: "Server is stopping...".to_string(),
            });
        }
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().sessions.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ChannelId;

    #[test]
    fn delivers_to_all_sessions_of_one_bot() {
        let hub = Arc::new(Hub::new());
        let streamer = BotStreamer::new(hub.clone(), Arc::new(WebRtcManager::new(hub)), 1);
        let bot = UserId::generate();
        let (_a, mut rx_a) = streamer.open_session(bot).unwrap();
        let (_b, _rx_b) = streamer.open_session(bot).unwrap();
        let (_other, mut rx_other) = streamer.open_session(UserId::generate()).unwrap();

        let req = Uuid::new_v4();
        let (errors, attempted) = streamer.write_message("PING", req, &json!({}), bot);
        assert!(attempted && errors.is_empty());
        let Ok(Outbound::Text(text)) = rx_a.try_recv() else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["reqId"], req.to_string());
        assert!(rx_other.try_recv().is_err());

        let (errors, _) = streamer.write_message("PING", req, &json!({}), bot);
        // a 的队列已被读空，只有 b 满
        assert_eq!(errors, vec![DomainError::BufferFull]);

        let (errors, attempted) = streamer.write_message("PING", req, &json!({}), UserId::generate());
        assert!(!attempted && errors.is_empty());
    }

    #[test]
    fn only_rtcstate_is_accepted() {
        let hub = Arc::new(Hub::new());
        let webrtc = Arc::new(WebRtcManager::new(hub.clone()));
        let streamer = BotStreamer::new(hub, webrtc.clone(), 8);
        let bot = UserId::generate();
        let (session, mut rx) = streamer.open_session(bot).unwrap();

        streamer.handle_command(&session, &format!("rtcstate:{}:joined:s", ChannelId::generate()));
        assert!(webrtc.get_user_state(bot).is_some());
        assert!(rx.try_recv().is_err());

        streamer.handle_command(&session, "timeline_streaming:on");
        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(_))));

        streamer.close_session(&session);
        assert!(webrtc.get_user_state(bot).is_none());
        assert_eq!(streamer.session_count(), 0);
    }
}
