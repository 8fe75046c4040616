// common_models/src/ws_payloads.rs

//! 看板 WebSocket 通道中传输的消息负载定义。
//!
//! 服务端下行的每一帧都是一个 [`DashboardEvent`]，序列化为带 `type` 判别字段的 JSON 对象，
//! 例如：
//!
//! ```json
//! {"type":"telemetry","uav_id":"UAV-01","timestamp":"...","data":{"latitude":30.57,...}}
//! {"type":"alert","level":"warning","message":"UAV-01 电量低于 30%","timestamp":"..."}
//! ```
//!
//! 客户端上行只有一种控制消息 [`ClientMessage::Ping`]，服务端以 `pong` 应答。
//! 事件一经构造即不可变，本层不做持久化。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{AlertLevel, DetectionClass, FlightMode};

/// 服务端推送给看板客户端的事件。
///
/// 使用内部标签（`type` 字段）区分事件种类，字段名与看板前端约定保持一致。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// 单架无人机的遥测采样。
    Telemetry(TelemetryEvent),
    /// 一帧检测结果。
    Detection(DetectionEvent),
    /// 系统告警。
    Alert(AlertEvent),
    /// 看板汇总统计。
    Stats(DashboardStats),
    /// 状态频道心跳。
    Heartbeat(HeartbeatEvent),
    /// 对客户端 Ping 的应答。
    Pong(PongMessage),
}

impl DashboardEvent {
    /// 返回线上 `type` 字段的取值。
    pub fn type_name(&self) -> &'static str {
        match self {
            DashboardEvent::Telemetry(_) => "telemetry",
            DashboardEvent::Detection(_) => "detection",
            DashboardEvent::Alert(_) => "alert",
            DashboardEvent::Stats(_) => "stats",
            DashboardEvent::Heartbeat(_) => "heartbeat",
            DashboardEvent::Pong(_) => "pong",
        }
    }
}

/// 遥测事件：某架无人机在某一时刻的状态。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub uav_id: String,
    /// 精简帧可以省略时间戳，解析时取接收时刻。
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub data: TelemetrySample,
}

/// 遥测采样数据。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    /// 纬度（度）。
    pub latitude: f64,
    /// 经度（度）。
    pub longitude: f64,
    /// 相对高度（米）。
    pub altitude: f64,
    /// 地速（米/秒）。
    pub speed: f64,
    /// 航向（度，0-359）。
    pub heading: f64,
    /// 剩余电量百分比。
    pub battery: f64,
    /// 可见卫星数。
    #[serde(default)]
    pub satellites: u8,
    /// 信号强度（dBm）。
    #[serde(default)]
    pub signal_strength: i32,
    #[serde(default = "default_flight_mode")]
    pub flight_mode: FlightMode,
}

fn default_flight_mode() -> FlightMode {
    FlightMode::Auto
}

/// 检测事件：一帧画面上的检测框列表。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub frame_number: u64,
    pub detections: Vec<DetectionBox>,
}

/// 单个检测框。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectionBox {
    pub class_name: DetectionClass,
    /// 置信度，范围 0.0 - 1.0。
    pub confidence: f64,
    /// `[x, y, w, h]`，单位为像素。
    pub bbox: [u32; 4],
}

/// 告警事件。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub level: AlertLevel,
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// 看板汇总统计。
///
/// 字段集合取自后端当前实际推送的内容，`connections` 为服务端当前活动连接总数。
/// 帧中缺少的计数按 0 处理。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DashboardStats {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub online_uavs: u32,
    #[serde(default)]
    pub active_missions: u32,
    #[serde(default)]
    pub today_detections: u64,
    #[serde(default)]
    pub active_tracks: u32,
    #[serde(default)]
    pub connections: usize,
}

/// 状态频道心跳。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HeartbeatEvent {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub connections: usize,
    /// 服务端自启动以来运行的秒数。
    #[serde(default)]
    pub uptime_s: u64,
}

/// Pong 应答。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PongMessage {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl PongMessage {
    pub fn now() -> Self {
        Self { timestamp: Utc::now() }
    }
}

/// 客户端发往服务端的控制消息。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 应用层心跳，服务端回复 `pong`。
    Ping,
}
