//! WebSocket 连接的读写循环
//!
//! 写任务负责出站队列和心跳 ping，读任务把文本帧交给会话宿主处理。
//! 任意一方结束都会终止另一方，然后注销会话。

use std::sync::Arc;
use std::time::Duration;

use application::realtime::ws::CLOSE_UNSUPPORTED;
use application::realtime::{Outbound, Session};
use application::{BotStreamer, Streamer};
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use config::RealtimeConfig;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};

/// 浏览器和 bot 两种 streamer 的共同接口
pub trait SessionHost: Send + Sync + 'static {
    fn handle_command(&self, session: &Session, text: &str);
    fn close_session(&self, session: &Session);
}

impl SessionHost for Streamer {
    fn handle_command(&self, session: &Session, text: &str) {
        Streamer::handle_command(self, session, text);
    }

    fn close_session(&self, session: &Session) {
        Streamer::close_session(self, session);
    }
}

impl SessionHost for BotStreamer {
    fn handle_command(&self, session: &Session, text: &str) {
        BotStreamer::handle_command(self, session, text);
    }

    fn close_session(&self, session: &Session) {
        BotStreamer::close_session(self, session);
    }
}

/// 连接时限
#[derive(Debug, Clone, Copy)]
pub struct WsSettings {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
}

impl From<&RealtimeConfig> for WsSettings {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            write_wait: config.ws_write_wait,
            pong_wait: config.ws_pong_wait,
            ping_period: config.ws_ping_period,
        }
    }
}

pub struct WsConnection<H: SessionHost> {
    host: Arc<H>,
    session: Arc<Session>,
    outbound: mpsc::Receiver<Outbound>,
    settings: WsSettings,
}

impl<H: SessionHost> WsConnection<H> {
    pub fn new(
        host: Arc<H>,
        session: Arc<Session>,
        outbound: mpsc::Receiver<Outbound>,
        settings: WsSettings,
    ) -> Self {
        Self {
            host,
            session,
            outbound,
            settings,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let Self {
            host,
            session,
            mut outbound,
            settings,
        } = self;
        let (mut sender, mut incoming) = socket.split();

        let mut send_task = {
            let session_key = session.key().to_string();
            tokio::spawn(async move {
                let mut ping = interval_at(
                    Instant::now() + settings.ping_period,
                    settings.ping_period,
                );
                loop {
                    let (message, closing) = tokio::select! {
                        next = outbound.recv() => match next {
                            Some(Outbound::Text(text)) => (WsMessage::Text(text.into()), false),
                            Some(Outbound::Close { code, reason }) => (
                                WsMessage::Close(Some(CloseFrame { code, reason: reason.into() })),
                                true,
                            ),
                            None => break,
                        },
                        _ = ping.tick() => (WsMessage::Ping(Bytes::new()), false),
                    };

                    match timeout(settings.write_wait, sender.send(message)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::debug!(session = %session_key, error = %err, "WebSocket 写入失败");
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(session = %session_key, "WebSocket 写入超时");
                            break;
                        }
                    }
                    if closing {
                        break;
                    }
                }
            })
        };

        let mut recv_task = {
            let host = host.clone();
            let session = session.clone();
            tokio::spawn(async move {
                loop {
                    let message = match timeout(settings.pong_wait, incoming.next()).await {
                        Ok(Some(Ok(message))) => message,
                        Ok(Some(Err(err))) => {
                            tracing::debug!(session = session.key(), error = %err, "WebSocket 读取失败");
                            break;
                        }
                        Ok(None) => break,
                        Err(_) => {
                            tracing::info!(session = session.key(), "WebSocket 心跳超时");
                            break;
                        }
                    };

                    match message {
                        WsMessage::Text(text) => host.handle_command(&session, text.as_str()),
                        WsMessage::Binary(_) => {
                            let _ = session.write_message(Outbound::Close {
                                code: CLOSE_UNSUPPORTED,
                                reason: "binary frames are not supported".to_string(),
                            });
                        }
                        WsMessage::Close(_) => break,
                        // axum 自动回复 ping；收到 pong 即已刷新读超时
                        WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                    }
                }
            })
        };

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        host.close_session(&session);
    }
}
