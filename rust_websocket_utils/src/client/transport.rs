// rust_websocket_utils/src/client/transport.rs

//! 客户端 WebSocket 传输层。
//!
//! 提供单次连接的建立、文本帧的发送与接收。这里不做任何重连：
//! 一个 `ClientConnection` 断开后即失效，持续连接由
//! [`ReconnectingSocket`](super::reconnecting::ReconnectingSocket) 在其之上实现。

use std::time::Duration;

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use log::{debug, error, info};
use serde::Serialize;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::Error as TungsteniteError, tungstenite::protocol::Message,
};
use url::Url;

use crate::error::WsError;
use crate::message::encode_frame;

/// 客户端连接成功后得到的（可能经过 TLS 加密的）WebSocket 流。
pub type ClientWsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 一个活动的客户端 WebSocket 连接，已拆分为发送端和接收端。
pub struct ClientConnection {
    /// 发送端。
    pub ws_sender: SplitSink<ClientWsStream, Message>,
    /// 接收端。
    pub ws_receiver: SplitStream<ClientWsStream>,
}

impl ClientConnection {
    /// 发送一帧文本。
    pub async fn send_text(&mut self, text: String) -> Result<(), WsError> {
        debug!("客户端：准备发送文本帧: {}", text);
        self.ws_sender.send(Message::Text(text)).await?;
        Ok(())
    }

    /// 将事件编码为文本帧后发送。
    pub async fn send_event<T: Serialize>(&mut self, event: &T) -> Result<(), WsError> {
        let frame = encode_frame(event)?;
        self.send_text(frame).await
    }

    /// 发送 Close 帧并结束发送端。
    pub async fn close(&mut self) -> Result<(), WsError> {
        self.ws_sender.send(Message::Close(None)).await?;
        self.ws_sender.close().await?;
        Ok(())
    }
}

/// 连接到指定的 WebSocket 服务器。
///
/// # Arguments
/// * `url_str` - 完整的 WebSocket URL，例如 `ws://127.0.0.1:8088/ws/dashboard`。
///
/// # Returns
/// 连接和握手成功时返回 `ClientConnection`；URL 无效返回 `WsError::InvalidUrl`，
/// 连接或握手失败返回 `WsError::WebSocketProtocolError`。
pub async fn connect_client(url_str: &str) -> Result<ClientConnection, WsError> {
    debug!("客户端：开始尝试连接到 WebSocket 服务器，URL: {}", url_str);
    let parsed_url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    if !matches!(parsed_url.scheme(), "ws" | "wss") {
        return Err(WsError::InvalidUrl(format!(
            "不支持的协议 '{}'，WebSocket URL 必须以 ws:// 或 wss:// 开头",
            parsed_url.scheme()
        )));
    }

    match connect_async(parsed_url.as_str()).await {
        Ok((ws_stream, response)) => {
            info!("客户端：已成功连接到 {} (HTTP 状态码: {})", url_str, response.status());
            let (ws_sender, ws_receiver) = ws_stream.split();
            Ok(ClientConnection { ws_sender, ws_receiver })
        }
        Err(e) => {
            debug!("客户端：连接到 {} 失败，错误: {}", url_str, e);
            Err(WsError::WebSocketProtocolError(e))
        }
    }
}

/// 带超时的 [`connect_client`]。`timeout` 为 `None` 时不限时。
pub async fn connect_client_with_timeout(
    url_str: &str,
    timeout: Option<Duration>,
) -> Result<ClientConnection, WsError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, connect_client(url_str))
            .await
            .map_err(|_| WsError::ConnectionTimeout)?,
        None => connect_client(url_str).await,
    }
}

/// 从接收端读取下一帧文本。
///
/// Ping/Pong 由底层库自动处理，二进制帧和原始帧被跳过。
///
/// # Returns
/// * `Some(Ok(text))` - 收到一帧文本。
/// * `Some(Err(e))` - 接收过程中发生传输错误，连接应视为已断开。
/// * `None` - 对端关闭了连接或流已结束。
pub async fn receive_text(
    ws_receiver: &mut SplitStream<ClientWsStream>,
) -> Option<Result<String, WsError>> {
    loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => break Some(Ok(text)),
            Some(Ok(Message::Binary(bin))) => {
                debug!("客户端：跳过二进制帧，长度: {} 字节", bin.len());
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(close_frame))) => {
                debug!("客户端：收到 Close 控制帧: {:?}", close_frame);
                break None;
            }
            Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed)) => {
                debug!("客户端：连接已关闭。");
                break None;
            }
            Some(Err(e)) => {
                error!("客户端：从 WebSocket 流接收消息时发生底层错误: {}", e);
                break Some(Err(WsError::WebSocketProtocolError(e)));
            }
            None => {
                debug!("客户端：WebSocket 接收流已结束。");
                break None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    // 启动一个只服务一个连接的本地回显服务器
    async fn spawn_echo_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(text) => {
                        if ws.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });
        (format!("ws://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_client_connect_send_receive_echo() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (url, server) = spawn_echo_server().await;

        let mut conn = connect_client(&url).await.expect("连接本地回显服务器失败");
        conn.send_event(&serde_json::json!({"type": "ping"})).await.unwrap();

        let echoed = timeout(Duration::from_secs(5), receive_text(&mut conn.ws_receiver))
            .await
            .expect("等待回显超时");
        assert_eq!(echoed.unwrap().unwrap(), r#"{"type":"ping"}"#);

        conn.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_urls_are_rejected() {
        assert!(matches!(connect_client("not a url").await, Err(WsError::InvalidUrl(_))));
        assert!(matches!(
            connect_client("http://127.0.0.1:1/ws").await,
            Err(WsError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_protocol_error() {
        // 绑定后立即释放端口，确保无人监听
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_client_with_timeout(&format!("ws://{}", addr), Some(Duration::from_secs(5))).await;
        assert!(matches!(result, Err(WsError::WebSocketProtocolError(_))));
    }
}
