//! 通用枚举模块。
//!
//! 本模块定义了看板事件中使用的枚举类型。线上统一使用小写蛇形命名
//! （例如 `"warning"`、`"auto"`），与看板前端的约定保持一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 告警级别。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// 一般提示，例如任务完成、新目标进入监控区域。
    Info,
    /// 需要关注，例如电量偏低、信号下降。
    Warning,
    /// 故障，例如通信中断。
    Error,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// 无人机当前的飞行模式。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlightMode {
    /// 自动航线飞行。
    Auto,
    /// 手动操控。
    Manual,
    /// 定点悬停。
    Hold,
    /// 返航中。
    ReturnToLaunch,
    /// 降落中。
    Land,
}

/// 检测目标类别。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectionClass {
    Drone,
    Bird,
    Airplane,
    Helicopter,
    Unknown,
}

impl DetectionClass {
    /// 全部类别，按固定顺序排列。
    pub const ALL: [DetectionClass; 5] = [
        DetectionClass::Drone,
        DetectionClass::Bird,
        DetectionClass::Airplane,
        DetectionClass::Helicopter,
        DetectionClass::Unknown,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enums_use_snake_case_on_the_wire() {
        assert_eq!(serde_json::to_string(&AlertLevel::Warning).unwrap(), "\"warning\"");
        assert_eq!(serde_json::to_string(&FlightMode::ReturnToLaunch).unwrap(), "\"return_to_launch\"");
        assert_eq!(serde_json::to_string(&DetectionClass::Helicopter).unwrap(), "\"helicopter\"");
    }

    #[test]
    fn test_alert_level_display_matches_wire_name() {
        for level in [AlertLevel::Info, AlertLevel::Warning, AlertLevel::Error] {
            let wire = serde_json::to_string(&level).unwrap();
            assert_eq!(wire.trim_matches('"'), level.to_string());
        }
    }
}
