use rust_websocket_utils::error::WsError;
use thiserror::Error;

/// 应用的主要错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("WebSocket 服务错误: {0}")]
    WebSocketService(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("通道错误: {0}")]
    Channel(#[from] WsError),
}
