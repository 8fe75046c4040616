//! 配置模块：加载、创建并保存 `dashboard_hub` 的 JSON 配置文件。
//!
//! 配置文件路径取自环境变量 `UAV_HUB_CONFIG`，未设置时使用当前工作目录下的
//! `hub_settings.json`。文件不存在或内容损坏时使用默认配置，并把默认配置写回磁盘。

use log::{info, warn, LevelFilter};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;

/// 指定配置文件路径的环境变量。
pub const CONFIG_PATH_ENV: &str = "UAV_HUB_CONFIG";
/// 默认配置文件名。
pub const DEFAULT_CONFIG_FILE: &str = "hub_settings.json";
/// WebSocket 服务的默认主机地址
pub const DEFAULT_WS_HOST: &str = "0.0.0.0";
/// WebSocket 服务的默认端口号
pub const DEFAULT_WS_PORT: u16 = 8088;

/// WebSocket 服务端配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// 绑定的主机地址
    pub host: String,
    /// 监听的端口号
    pub port: u16,
    /// 每个连接出站队列的容量。队列写满视为投递失败，连接会被移除。
    pub outbound_queue_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_WS_HOST.to_string(),
            port: DEFAULT_WS_PORT,
            outbound_queue_capacity: rust_websocket_utils::server::DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl WebSocketConfig {
    /// `host:port` 形式的监听地址。
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 模拟事件源配置。各间隔单位为毫秒。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimulatorConfig {
    /// 是否启动模拟事件源
    pub enabled: bool,
    /// 看板频道上报遥测的无人机编号
    pub uav_ids: Vec<String>,
    pub dashboard_interval_ms: u64,
    pub telemetry_interval_ms: u64,
    pub detection_interval_ms: u64,
    pub status_interval_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uav_ids: vec!["UAV-01".to_string(), "UAV-02".to_string(), "UAV-03".to_string()],
            dashboard_interval_ms: 2000,
            telemetry_interval_ms: 1000,
            detection_interval_ms: 500,
            status_interval_ms: 5000,
        }
    }
}

impl SimulatorConfig {
    pub fn dashboard_interval(&self) -> Duration {
        Duration::from_millis(self.dashboard_interval_ms.max(1))
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms.max(1))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket 服务的相关配置
    pub websocket: WebSocketConfig,
    /// 模拟事件源配置
    pub simulator: SimulatorConfig,
    /// 日志级别（`error`/`warn`/`info`/`debug`/`trace`），设置了 `RUST_LOG` 时以后者为准
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            websocket: WebSocketConfig::default(),
            simulator: SimulatorConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 解析 `log_level`，无法识别时回退为 `Info`。
    pub fn log_level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }

    /// 检查配置中无法自动修正的错误。
    pub fn validate(&self) -> Result<(), AppError> {
        if self.websocket.host.trim().is_empty() {
            return Err(AppError::ConfigError("websocket.host 不能为空".to_string()));
        }
        if self.simulator.enabled && self.simulator.uav_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(AppError::ConfigError("simulator.uav_ids 中存在空的无人机编号".to_string()));
        }
        Ok(())
    }
}

/// 获取配置文件路径
pub fn config_file_path() -> PathBuf {
    match env::var_os(CONFIG_PATH_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE),
    }
}

/// 加载配置；文件缺失或损坏时返回默认配置并尝试写回磁盘。
pub fn load_or_create_config(config_file_path: &Path) -> AppConfig {
    match fs::read_to_string(config_file_path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已从配置文件 {:?} 加载应用配置。", config_file_path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 从 {:?} 反序列化配置失败: {}. 文件可能已损坏，将使用默认配置并覆盖。",
                    config_file_path, e
                );
                write_default(config_file_path)
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未能读取配置文件 {:?} (错误: {})，将使用默认配置并创建新文件。",
                config_file_path, e
            );
            write_default(config_file_path)
        }
    }
}

fn write_default(path: &Path) -> AppConfig {
    let default_config = AppConfig::default();
    match save_config(&default_config, path) {
        Ok(()) => info!("[配置模块] 已将默认配置保存到 {:?}。", path),
        Err(e) => warn!("[配置模块] 保存默认配置到 {:?} 失败: {}", path, e),
    }
    default_config
}

/// 保存配置到文件，必要时创建父目录。
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}
