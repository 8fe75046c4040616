//! 逻辑频道（Channel）名称。
//!
//! 频道是一个普通字符串，一个连接在其生命周期内只订阅一个频道。
//! 带参数的频道使用 `前缀:参数` 的形式，例如 `telemetry:UAV-01`。

/// 看板聚合频道：所有无人机遥测、检测、告警和统计。
pub const DASHBOARD_CHANNEL: &str = "dashboard";

/// 状态心跳频道。
pub const STATUS_CHANNEL: &str = "status";

/// 单机遥测频道前缀。
pub const TELEMETRY_CHANNEL_PREFIX: &str = "telemetry:";

/// 检测会话频道前缀。
pub const DETECTION_CHANNEL_PREFIX: &str = "detection:";

/// 构造指定无人机的遥测频道名。
pub fn telemetry_channel(uav_id: &str) -> String {
    format!("{}{}", TELEMETRY_CHANNEL_PREFIX, uav_id)
}

/// 构造指定检测会话的频道名。
pub fn detection_channel(session_id: &str) -> String {
    format!("{}{}", DETECTION_CHANNEL_PREFIX, session_id)
}

/// 若 `channel` 是遥测频道，返回其中的无人机编号。
pub fn telemetry_uav_id(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(TELEMETRY_CHANNEL_PREFIX)
        .filter(|id| !id.is_empty())
}

/// 若 `channel` 是检测频道，返回其中的会话编号。
pub fn detection_session_id(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(DETECTION_CHANNEL_PREFIX)
        .filter(|id| !id.is_empty())
}
