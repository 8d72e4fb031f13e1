use std::sync::Arc;

use application::{
    BotStreamer, Counters, Hub, RealtimeStats, SseStreamer, Streamer, UserRepository,
    ViewerManager, WebRtcManager,
};
use config::RealtimeConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub ws: Arc<Streamer>,
    pub bots: Arc<BotStreamer>,
    pub sse: SseStreamer,
    pub viewers: Arc<ViewerManager>,
    pub webrtc: Arc<WebRtcManager>,
    pub counters: Arc<Counters>,
    pub users: Arc<dyn UserRepository>,
    pub jwt_service: Arc<JwtService>,
    pub realtime: Arc<RealtimeConfig>,
}

impl AppState {
    /// 汇总各组件的即时指标
    pub fn realtime_stats(&self) -> RealtimeStats {
        let (webrtc_users, webrtc_channels) = self.webrtc.gauges();
        RealtimeStats {
            online_users: self.counters.online.online_count(),
            ws_sessions: self.ws.session_count(),
            bot_ws_sessions: self.bots.session_count(),
            sse_streams: self.sse.connection_count(),
            viewers: self.viewers.viewer_count(),
            webrtc_users,
            webrtc_channels,
            hub_subscribers: self.hub.subscriber_count(),
            total_messages: self.counters.messages.get(),
            total_channels: self.counters.channels.get(),
            total_users: self.counters.users.get(),
            unread_messages: self.counters.unread.get(),
        }
    }
}
