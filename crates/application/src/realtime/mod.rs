//! 实时推送层：浏览器 WebSocket、Bot WebSocket 与 SSE
//!
//! 这里只管理会话和投递，具体的网络读写由 web 层完成。

pub mod bot_ws;
pub mod sse;
pub mod ws;

pub use bot_ws::BotStreamer;
pub use sse::{SseEvent, SseStreamer, SseSubscription};
pub use ws::{Outbound, Session, Streamer, Target};
