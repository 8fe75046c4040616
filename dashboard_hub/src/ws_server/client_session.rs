//! 单个 WebSocket 连接的会话循环。
//!
//! 握手完成后为连接创建一个 [`QueuedConnection`] 并注册到路由对应的频道，
//! 随后在同一个循环里：
//! - 把出站队列中的事件帧写入套接字；
//! - 处理客户端上行消息（`ping` 应答 `pong`，Close 结束会话）。
//!
//! 无论以何种方式退出，会话都会把连接从注册表中注销，注销后不会再收到任何广播。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use common_models::{ClientMessage, DashboardEvent, PongMessage};
use log::{debug, info, warn};
use rust_websocket_utils::message::{encode_frame, parse_frame};
use rust_websocket_utils::server::{Connection, QueuedConnection};

use super::service::HubState;

/// 运行一个客户端会话直到连接结束。
pub async fn run_session(mut socket: WebSocket, channel: String, peer_addr: Option<SocketAddr>, state: Arc<HubState>) {
    let (connection, mut outbound) = QueuedConnection::new(peer_addr, state.outbound_capacity);
    let client_id = connection.id();

    if let Err(e) = state.registry.register(&channel, connection.clone()) {
        warn!("[会话] 客户端 {} ({:?}) 无法加入频道 '{}': {}", client_id, peer_addr, channel, e);
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    info!(
        "[会话] 客户端 {} ({:?}) 已加入频道 '{}'，当前频道连接数: {}",
        client_id,
        peer_addr,
        channel,
        state.registry.channel_len(&channel)
    );

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(frame) => {
                    if let Err(e) = socket.send(Message::Text(frame)).await {
                        debug!("[会话] 向客户端 {} 写入失败: {}", client_id, e);
                        break;
                    }
                }
                None => {
                    // 连接已被注册表关闭（投递失败或服务关闭）
                    debug!("[会话] 客户端 {} 的出站队列已关闭", client_id);
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(message)) => {
                    if !handle_client_message(message, &mut socket, &connection).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!("[会话] 客户端 {} 连接错误: {}", client_id, e);
                    break;
                }
                None => break,
            },
        }
    }

    state.registry.unregister(&channel, &client_id);
    connection.close();
    info!(
        "[会话] 客户端 {} ({:?}) 已离开频道 '{}'，连接时长 {} 秒",
        client_id,
        peer_addr,
        channel,
        (chrono::Utc::now() - connection.connected_at()).num_seconds()
    );
}

/// 处理一条客户端消息。返回 `false` 表示应结束会话。
async fn handle_client_message(message: Message, socket: &mut WebSocket, connection: &QueuedConnection) -> bool {
    match message {
        Message::Text(text) => {
            match parse_frame::<ClientMessage>(&text) {
                Some(ClientMessage::Ping) => {
                    let pong = DashboardEvent::Pong(PongMessage::now());
                    match encode_frame(&pong) {
                        Ok(frame) => {
                            if socket.send(Message::Text(frame)).await.is_err() {
                                return false;
                            }
                        }
                        Err(e) => warn!("[会话] 编码 pong 失败: {}", e),
                    }
                }
                None => debug!("[会话] 忽略客户端 {} 的未知消息: {}", connection.id(), text),
            }
            true
        }
        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(frame) => {
            debug!("[会话] 客户端 {} 请求关闭: {:?}", connection.id(), frame);
            false
        }
    }
}
