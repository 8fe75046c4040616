//! WebSocket 服务端：路由与服务启动、单连接会话循环、广播分发器。

pub mod client_session;
pub mod dispatcher;
pub mod service;

pub use dispatcher::{BroadcastDispatcher, StatsSnapshot};
pub use service::{create_router, serve, HubState, WsService, WsStatsResponse};
