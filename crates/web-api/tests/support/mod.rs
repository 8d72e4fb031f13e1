use std::net::SocketAddr;
use std::sync::Arc;

use application::{
    BotStreamer, Counters, Hub, SseStreamer, Streamer, SystemClock, ViewerManager, WebRtcManager,
};
use config::{JwtConfig, RealtimeConfig};
use domain::{User, UserId};
use infrastructure::MemoryRepository;
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState, JwtService};

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub repo: Arc<MemoryRepository>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let realtime = RealtimeConfig::default();
        let repo = Arc::new(MemoryRepository::new());
        let hub = Arc::new(Hub::new());
        let viewers = Arc::new(ViewerManager::new(hub.clone(), Arc::new(SystemClock)));
        let webrtc = Arc::new(WebRtcManager::new(hub.clone()));
        let counters = Counters::init(hub.clone(), repo.as_ref(), repo.as_ref(), repo.as_ref())
            .await
            .expect("counters");

        let state = AppState {
            ws: Arc::new(Streamer::new(
                hub.clone(),
                viewers.clone(),
                webrtc.clone(),
                realtime.ws_buffer_size,
            )),
            bots: Arc::new(BotStreamer::new(
                hub.clone(),
                webrtc.clone(),
                realtime.ws_buffer_size,
            )),
            sse: SseStreamer::new(hub.clone(), realtime.sse_buffer_size),
            hub,
            viewers,
            webrtc,
            counters: Arc::new(counters),
            users: repo.clone(),
            jwt_service: Arc::new(JwtService::new(JwtConfig {
                secret: "test-secret-key".to_string(),
                expiration_hours: 24,
            })),
            realtime: Arc::new(realtime),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            state,
            repo,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn add_user(&self, name: &str, bot: bool) -> UserId {
        let mut user = User::new(name);
        user.bot = bot;
        let id = user.id;
        self.repo.add_user(user);
        id
    }

    pub fn token(&self, user_id: UserId) -> String {
        self.state
            .jwt_service
            .generate_token(user_id)
            .expect("token")
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str, token: &str) -> String {
        format!("ws://{}{}?token={}", self.addr, path, token)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
