//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了无人机调度看板实时通道中，服务端（`dashboard_hub`）
//! 与各类客户端（看板前端、`dashboard_monitor` 等）之间共享的数据结构。
//!
//! 主要包含：
//! - **通道 (`channels`)**: 逻辑频道名称的常量与构造函数，例如 `dashboard`、`telemetry:{uav_id}`。
//! - **WebSocket 消息负载 (`ws_payloads`)**: 以 `type` 字段区分的看板事件（遥测、检测、告警、统计、心跳），
//!   以及客户端发往服务端的控制消息（Ping）。
//! - **通用枚举 (`enums`)**: 告警级别、飞行模式、检测目标类别等。
//!
//! 所有模型都派生 `Serialize`/`Deserialize`/`Debug`/`Clone`，
//! 线上格式为 UTF-8 JSON 文本帧。

pub mod channels;
pub mod enums;
pub mod ws_payloads;

pub use enums::{AlertLevel, DetectionClass, FlightMode};
pub use ws_payloads::{
    AlertEvent, ClientMessage, DashboardEvent, DashboardStats, DetectionBox, DetectionEvent,
    HeartbeatEvent, PongMessage, TelemetryEvent, TelemetrySample,
};
