//! 实时推送服务入口
//!
//! 组装事件总线、各管理器、推送通道与通知扇出，然后启动 Axum 服务。

use std::sync::Arc;

use application::{
    BotStreamer, ChannelManager, Counters, DeviceRepository, Hub, MessageManager,
    NotificationDependencies, NotificationService, PushClient, SseStreamer, StampThrottler,
    Streamer, SystemClock, UnreadRepository, ViewerManager, WebRtcManager,
};
use config::AppConfig;
use infrastructure::{
    create_pg_pool, HttpPushProvider, MemoryRepository, PgDeviceRepository, PgUnreadRepository,
    MIGRATOR,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    let realtime = &config.realtime;

    let memory = Arc::new(MemoryRepository::new());
    let (unreads, devices): (Arc<dyn UnreadRepository>, Arc<dyn DeviceRepository>) =
        match &config.database.url {
            Some(url) => {
                tracing::info!("连接数据库: {}", url.split('@').last().unwrap_or("unknown"));
                let pool = create_pg_pool(url, config.database.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                (
                    Arc::new(PgUnreadRepository::new(pool.clone())),
                    Arc::new(PgDeviceRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("未配置数据库，未读与设备数据仅保存在内存中");
                (memory.clone(), memory.clone())
            }
        };

    let hub = Arc::new(Hub::new());
    let channels = Arc::new(
        ChannelManager::new(memory.clone(), hub.clone(), realtime.max_channel_depth).await?,
    );
    let messages = Arc::new(MessageManager::new(
        memory.clone(),
        unreads.clone(),
        memory.clone(),
        channels.clone(),
        hub.clone(),
        realtime,
    )?);
    let viewers = Arc::new(ViewerManager::new(hub.clone(), Arc::new(SystemClock)));
    let webrtc = Arc::new(WebRtcManager::new(hub.clone()));
    let ws = Arc::new(Streamer::new(
        hub.clone(),
        viewers.clone(),
        webrtc.clone(),
        realtime.ws_buffer_size,
    ));
    let bots = Arc::new(BotStreamer::new(
        hub.clone(),
        webrtc.clone(),
        realtime.ws_buffer_size,
    ));
    let sse = SseStreamer::new(hub.clone(), realtime.sse_buffer_size);

    let counters = Arc::new(
        Counters::init(
            hub.clone(),
            memory.as_ref(),
            memory.as_ref(),
            memory.as_ref(),
        )
        .await?,
    );
    counters.spawn(&hub, realtime.hub_subscriber_buffer);

    let throttler = Arc::new(StampThrottler::for_messages(
        messages.clone(),
        hub.clone(),
        realtime.stamp_throttle_interval,
        realtime.stamp_throttle_ttl,
    ));
    throttler.run(&hub, realtime.hub_subscriber_buffer);
    viewers.spawn_gc(realtime.viewer_gc_interval);

    let push = if config.push.enabled {
        let provider = Arc::new(HttpPushProvider::new(&config.push)?);
        Some(Arc::new(PushClient::new(
            provider,
            devices,
            unreads.clone(),
            &config.push,
        )))
    } else {
        tracing::info!("推送通知未启用");
        None
    };

    let notification = Arc::new(NotificationService::new(NotificationDependencies {
        hub: hub.clone(),
        channels: channels.clone(),
        messages: messages.clone(),
        users: memory.clone(),
        unreads,
        files: memory.clone(),
        viewers: viewers.clone(),
        ws: ws.clone(),
        sse: sse.clone(),
        push: push.clone(),
        origin: realtime.origin.clone(),
    }));
    notification.start(realtime.hub_subscriber_buffer);

    let state = AppState {
        hub,
        ws: ws.clone(),
        bots: bots.clone(),
        sse: sse.clone(),
        viewers,
        webrtc,
        counters,
        users: memory,
        jwt_service: Arc::new(JwtService::new(config.jwt.clone())),
        realtime: Arc::new(realtime.clone()),
    };

    // 启动 Web 服务器
    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("实时推送服务启动在 http://{}", addr);

    let shutdown_ws = ws.clone();
    let shutdown_bots = bots.clone();
    let shutdown_sse = sse.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "无法监听退出信号");
            }
            tracing::info!("收到退出信号，开始关闭");
            // 先通知客户端断开，长连接才能结束
            if let Err(err) = shutdown_ws.shutdown() {
                tracing::warn!(error = %err, "WebSocket streamer 关闭失败");
            }
            if let Err(err) = shutdown_bots.shutdown() {
                tracing::warn!(error = %err, "Bot streamer 关闭失败");
            }
            shutdown_sse.shutdown();
        })
        .await?;

    notification.wait().await;
    if let Some(push) = push {
        push.close().await;
    }
    messages.wait().await;
    channels.wait().await;
    tracing::info!("服务已停止");

    Ok(())
}
