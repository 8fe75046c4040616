//! 广播分发器：把领域事件翻译成线上事件帧，并交给连接注册表扇出。
//!
//! 分发器本身不持有任何可变状态，每个领域事件恰好对应一次
//! [`ConnectionRegistry::broadcast`] 调用，不做合并或限流。

use std::sync::Arc;

use chrono::Utc;
use common_models::{
    AlertEvent, AlertLevel, DashboardEvent, DashboardStats, DetectionBox, DetectionEvent, HeartbeatEvent,
    TelemetryEvent, TelemetrySample,
};
use log::debug;
use rust_websocket_utils::message::encode_frame;
use rust_websocket_utils::server::{BroadcastReport, ConnectionRegistry};

use crate::error::AppError;

/// 看板统计中由事件源提供的部分；时间戳与连接数由分发器补齐。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub online_uavs: u32,
    pub active_missions: u32,
    pub today_detections: u64,
    pub active_tracks: u32,
}

#[derive(Clone)]
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// 编码事件并向频道广播一次。
    ///
    /// 单个连接的投递失败由注册表隔离处理，只体现在返回的 `BroadcastReport` 中；
    /// 只有事件本身无法编码时才返回错误。
    pub fn dispatch(&self, channel: &str, event: &DashboardEvent) -> Result<BroadcastReport, AppError> {
        let frame = encode_frame(event)?;
        let report = self.registry.broadcast(channel, &frame);
        debug!(
            "[分发器] 频道 '{}' 广播 {} 事件：成功 {}，失败 {}",
            channel,
            event.type_name(),
            report.delivered,
            report.failed
        );
        Ok(report)
    }

    pub fn publish_telemetry(
        &self,
        channel: &str,
        uav_id: &str,
        data: TelemetrySample,
    ) -> Result<BroadcastReport, AppError> {
        let event = DashboardEvent::Telemetry(TelemetryEvent {
            uav_id: uav_id.to_string(),
            timestamp: Utc::now(),
            data,
        });
        self.dispatch(channel, &event)
    }

    pub fn publish_detection(
        &self,
        channel: &str,
        frame_number: u64,
        detections: Vec<DetectionBox>,
    ) -> Result<BroadcastReport, AppError> {
        let event = DashboardEvent::Detection(DetectionEvent {
            timestamp: Utc::now(),
            frame_number,
            detections,
        });
        self.dispatch(channel, &event)
    }

    pub fn publish_alert(
        &self,
        channel: &str,
        level: AlertLevel,
        message: impl Into<String>,
    ) -> Result<BroadcastReport, AppError> {
        let event = DashboardEvent::Alert(AlertEvent {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        });
        self.dispatch(channel, &event)
    }

    /// 广播看板统计，`connections` 取注册表当前的连接总数。
    pub fn publish_stats(&self, channel: &str, snapshot: StatsSnapshot) -> Result<BroadcastReport, AppError> {
        let event = DashboardEvent::Stats(DashboardStats {
            timestamp: Utc::now(),
            online_uavs: snapshot.online_uavs,
            active_missions: snapshot.active_missions,
            today_detections: snapshot.today_detections,
            active_tracks: snapshot.active_tracks,
            connections: self.registry.connection_count(),
        });
        self.dispatch(channel, &event)
    }

    pub fn publish_heartbeat(&self, channel: &str, uptime_s: u64) -> Result<BroadcastReport, AppError> {
        let event = DashboardEvent::Heartbeat(HeartbeatEvent {
            timestamp: Utc::now(),
            connections: self.registry.connection_count(),
            uptime_s,
        });
        self.dispatch(channel, &event)
    }
}
