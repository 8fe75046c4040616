//! `dashboard_hub` 服务端核心库。
//!
//! 无人机看板的实时数据分发层：客户端按频道订阅，服务端把遥测、检测、告警、
//! 统计与心跳事件广播给频道内的所有连接。
//!
//! 主要模块包括：
//! - `config`: 应用配置的加载、创建与保存。
//! - `error`: 应用特定的错误类型。
//! - `simulator`: 模拟事件源，按固定节奏产生各频道的事件。
//! - `ws_server`: WebSocket 服务端，包含路由、会话循环和广播分发器。

pub mod config;
pub mod error;
pub mod simulator;
pub mod ws_server;
