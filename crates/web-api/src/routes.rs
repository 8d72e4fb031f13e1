use std::convert::Infallible;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, Method},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Extension, Json, Router,
};
use futures_util::stream::{self, Stream};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use application::{RealtimeStats, SseSubscription};

use crate::auth::{require_auth, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws_connection::{WsConnection, WsSettings};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/ws", get(user_ws))
        .route("/bots/ws", get(bot_ws))
        .route("/sse", get(sse))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
        .route("/stats/realtime", get(realtime_stats))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn realtime_stats(State(state): State<AppState>) -> Json<RealtimeStats> {
    Json(state.realtime_stats())
}

async fn user_ws(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    if state.ws.is_closed() {
        return Err(ApiError::service_unavailable("server is stopping"));
    }
    let limit = state.realtime.ws_max_read_message_size;
    let settings = WsSettings::from(state.realtime.as_ref());

    Ok(ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            let (session, outbound) = match state.ws.open_session(user_id) {
                Ok(opened) => opened,
                Err(err) => {
                    tracing::warn!(user_id = %user_id, error = %err, "无法建立 WebSocket 会话");
                    return;
                }
            };
            WsConnection::new(state.ws.clone(), session, outbound, settings)
                .run(socket)
                .await;
        }))
}

async fn bot_ws(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user = state.users.get_user(user_id).await?;
    if !user.bot {
        return Err(ApiError::forbidden("only bot users can connect"));
    }
    let limit = state.realtime.ws_max_read_message_size;
    let settings = WsSettings::from(state.realtime.as_ref());

    Ok(ws
        .max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| async move {
            let (session, outbound) = match state.bots.open_session(user_id) {
                Ok(opened) => opened,
                Err(err) => {
                    tracing::warn!(user_id = %user_id, error = %err, "无法建立 Bot WebSocket 会话");
                    return;
                }
            };
            WsConnection::new(state.bots.clone(), session, outbound, settings)
                .run(socket)
                .await;
        }))
}

async fn sse(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state.sse.subscribe(user_id)?;
    let keep_alive = KeepAlive::new().interval(state.realtime.sse_keepalive);

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (header::CONNECTION, "keep-alive"),
        ],
        [("X-Accel-Buffering", "no")],
        Sse::new(event_stream(subscription)).keep_alive(keep_alive),
    ))
}

/// 订阅被丢弃（客户端断开）时自动注销
fn event_stream(subscription: SseSubscription) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let frame = Event::default()
            .event(event.event)
            .data(event.data.to_string());
        Some((Ok(frame), subscription))
    })
}
