// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! - `transport`: 单次连接的建立与文本帧收发，封装 `tokio-tungstenite` 的细节。
//! - `endpoint`: 根据页面来源推导 `ws`/`wss` 端点地址。
//! - `reconnecting`: 在 `transport` 之上实现固定间隔自动重连、强类型订阅的客户端。

pub mod endpoint;
pub mod reconnecting;
pub mod transport;

pub use endpoint::{DASHBOARD_PATH, endpoint_url};
pub use reconnecting::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_INTERVAL, ReconnectConfig, ReconnectingSocket, SocketState,
    Subscription,
};
pub use transport::{ClientConnection, connect_client, connect_client_with_timeout, receive_text};
