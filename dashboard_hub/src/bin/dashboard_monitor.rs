//! 看板监视器：以看板前端的方式订阅 `/ws/dashboard`，把连接状态与收到的事件打印到日志。
//!
//! 用法：`dashboard_monitor [页面来源]`，页面来源默认为 `http://127.0.0.1:8088`，
//! `https://` 来源会使用 `wss://` 连接。

use anyhow::Context;
use common_models::{ClientMessage, DashboardEvent};
use log::{info, warn, LevelFilter};
use rust_websocket_utils::client::{endpoint_url, DASHBOARD_PATH};
use rust_websocket_utils::{ReconnectConfig, ReconnectingSocket, SocketState};
use std::env;
use std::time::Duration;

const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8088";
const PING_INTERVAL: Duration = Duration::from_secs(15);

fn describe(event: &DashboardEvent) -> String {
    match event {
        DashboardEvent::Telemetry(t) => format!(
            "{} 位置 ({:.5}, {:.5}) 高度 {:.1} m 速度 {:.1} m/s 电量 {:.1}%",
            t.uav_id, t.data.latitude, t.data.longitude, t.data.altitude, t.data.speed, t.data.battery
        ),
        DashboardEvent::Detection(d) => format!("第 {} 帧检测到 {} 个目标", d.frame_number, d.detections.len()),
        DashboardEvent::Alert(a) => format!("[{}] {}", a.level, a.message),
        DashboardEvent::Stats(s) => format!(
            "在线 {} 架，任务 {} 个，今日检测 {}，跟踪 {}，连接 {}",
            s.online_uavs, s.active_missions, s.today_detections, s.active_tracks, s.connections
        ),
        DashboardEvent::Heartbeat(h) => format!("心跳：连接 {}，运行 {} 秒", h.connections, h.uptime_s),
        DashboardEvent::Pong(_) => "pong".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();

    let origin = env::args().nth(1).unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
    let url = endpoint_url(&origin, DASHBOARD_PATH).with_context(|| format!("无法由页面来源 {} 推导看板地址", origin))?;
    info!("[看板监视器] 连接 {}", url);

    let socket = ReconnectingSocket::<DashboardEvent>::open(ReconnectConfig::new(url.as_str()))?;
    let _subscription = socket.subscribe(|event| info!("[看板监视器] {}: {}", event.type_name(), describe(event)));

    let mut states = socket.watch_state();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    SocketState::Connected => info!("[看板监视器] 已连接"),
                    SocketState::Disconnected => warn!("[看板监视器] 连接断开，等待重连"),
                    SocketState::Connecting => {}
                    SocketState::Closed => break,
                }
            }
            _ = ping.tick() => {
                if let Err(e) = socket.send(&ClientMessage::Ping) {
                    warn!("[看板监视器] 编码 ping 失败: {}", e);
                }
            }
            _ = &mut ctrl_c => {
                info!("[看板监视器] 收到 Ctrl-C，正在关闭");
                break;
            }
        }
    }

    socket.close().await;
    Ok(())
}
