//! `rust_websocket_utils` 是看板实时通道的 WebSocket 工具库。
//!
//! 主要模块包括：
//! - `message`: 文本帧的编码与解码，约定每帧都是带 `type` 字段的 JSON 对象。
//! - `error`: 库中统一使用的错误类型 `WsError`。
//! - `server`: 按频道管理连接的注册表，以及基于有界出站队列的服务端连接。
//! - `client`: 客户端传输层、端点推导和自动重连客户端 `ReconnectingSocket`。

pub mod client;
pub mod error;
pub mod message;
pub mod server;

pub use client::{ReconnectConfig, ReconnectingSocket, SocketState, Subscription};
pub use error::WsError;
pub use server::{BroadcastReport, Connection, ConnectionId, ConnectionRegistry, QueuedConnection};
