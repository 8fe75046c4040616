// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! 本模块只关心"连接如何登记、事件如何扇出"，与具体的 HTTP/WebSocket 框架无关：
//! - `registry`: 按频道管理活动连接的 [`ConnectionRegistry`]，提供注册、幂等注销和快照广播。
//! - `connection`: [`QueuedConnection`]，把广播帧放入有界出站队列，由会话任务负责实际写出。
//!
//! 握手、路由以及每个连接的读写循环由上层服务（例如 `dashboard_hub`）实现。

pub mod connection;
pub mod registry;

pub use connection::{DEFAULT_OUTBOUND_CAPACITY, QueuedConnection};
pub use registry::{BroadcastReport, Connection, ConnectionId, ConnectionRegistry};
