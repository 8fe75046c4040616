//! WebSocket 服务：路由、共享状态与服务启动。
//!
//! 路由：
//! - `/ws/dashboard`、`/ws/status`：固定频道；
//! - `/ws/telemetry/:uav_id`、`/ws/detection/:session_id`：按路径参数派生频道；
//! - `/health`：存活检查；
//! - `/api/ws/stats`：各频道连接数。

use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::{ConnectInfo, Path, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use common_models::channels::{detection_channel, telemetry_channel, DASHBOARD_CHANNEL, STATUS_CHANNEL};
use log::{error, info};
use rust_websocket_utils::server::ConnectionRegistry;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use super::client_session::run_session;
use super::dispatcher::BroadcastDispatcher;
use crate::config::WebSocketConfig;
use crate::error::AppError;

/// 服务运行期间各组件共享的状态。
pub struct HubState {
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: BroadcastDispatcher,
    /// 新连接出站队列的容量
    pub outbound_capacity: usize,
    started_at: Instant,
}

impl HubState {
    pub fn new(registry: Arc<ConnectionRegistry>, outbound_capacity: usize) -> Self {
        Self {
            dispatcher: BroadcastDispatcher::new(Arc::clone(&registry)),
            registry,
            outbound_capacity,
            started_at: Instant::now(),
        }
    }

    /// 自服务启动以来经过的时间。
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// `/api/ws/stats` 的响应体。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WsStatsResponse {
    pub connections: usize,
    pub channels: BTreeMap<String, usize>,
    pub uptime_s: u64,
}

/// 创建包含全部端点的路由。
pub fn create_router(state: Arc<HubState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/dashboard", get(ws_dashboard))
        .route("/ws/status", get(ws_status))
        .route("/ws/telemetry/:uav_id", get(ws_telemetry))
        .route("/ws/detection/:session_id", get(ws_detection))
        .route("/health", get(health_check))
        .route("/api/ws/stats", get(ws_stats))
        .layer(cors)
        .with_state(state)
}

fn upgrade(
    ws: WebSocketUpgrade,
    channel: String,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    state: Arc<HubState>,
) -> Response {
    let peer_addr = connect_info.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| run_session(socket, channel, peer_addr, state))
}

async fn ws_dashboard(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<HubState>>,
) -> Response {
    upgrade(ws, DASHBOARD_CHANNEL.to_string(), connect_info, state)
}

async fn ws_status(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<HubState>>,
) -> Response {
    upgrade(ws, STATUS_CHANNEL.to_string(), connect_info, state)
}

async fn ws_telemetry(
    ws: WebSocketUpgrade,
    Path(uav_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<HubState>>,
) -> Response {
    upgrade(ws, telemetry_channel(&uav_id), connect_info, state)
}

async fn ws_detection(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<HubState>>,
) -> Response {
    upgrade(ws, detection_channel(&session_id), connect_info, state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ws_stats(State(state): State<Arc<HubState>>) -> Json<WsStatsResponse> {
    Json(WsStatsResponse {
        connections: state.registry.connection_count(),
        channels: state.registry.channel_counts().into_iter().collect(),
        uptime_s: state.uptime().as_secs(),
    })
}

/// 在给定的监听器上提供服务，直到 `shutdown` 完成。
pub async fn serve<F>(listener: TcpListener, state: Arc<HubState>, shutdown: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::WebSocketService(format!("HTTP/WebSocket 服务异常退出: {}", e)))
}

/// 按配置绑定地址并运行的 WebSocket 服务。
pub struct WsService {
    config: WebSocketConfig,
    state: Arc<HubState>,
}

impl WsService {
    pub fn new(config: WebSocketConfig, state: Arc<HubState>) -> Self {
        Self { config, state }
    }

    /// 绑定监听地址并运行，直到 `shutdown` 完成。
    pub async fn start<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("无法绑定 WebSocket 服务地址 {}", addr))?;
        info!(
            "[WebSocket 服务] 正在监听 {}，看板端点 ws://{}/ws/dashboard",
            listener.local_addr().context("无法读取监听地址")?,
            addr
        );

        if let Err(e) = serve(listener, self.state, shutdown).await {
            error!("[WebSocket 服务] {}", e);
            return Err(e.into());
        }
        info!("[WebSocket 服务] 已停止");
        Ok(())
    }
}
