// rust_websocket_utils/src/client/endpoint.rs

//! 由页面来源推导 WebSocket 端点地址。
//!
//! 协议跟随页面：`http` 页面使用 `ws`，`https` 页面使用 `wss`。

use url::Url;

use crate::error::WsError;

/// 仪表盘通道的默认路径。
pub const DASHBOARD_PATH: &str = "/ws/dashboard";

/// 根据页面来源（例如 `https://ops.example.com`）与路径拼出 WebSocket URL。
///
/// 已经是 `ws`/`wss` 的来源原样沿用其协议。来源中的路径、查询串和片段被丢弃，
/// 只保留主机与端口。
///
/// # Errors
/// 来源无法解析、缺少主机或协议不受支持时返回 `WsError::InvalidUrl`。
pub fn endpoint_url(page_origin: &str, path: &str) -> Result<Url, WsError> {
    let origin = Url::parse(page_origin)
        .map_err(|e| WsError::InvalidUrl(format!("无法解析页面来源 '{}': {}", page_origin, e)))?;

    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(WsError::InvalidUrl(format!(
                "页面来源 '{}' 的协议 '{}' 无法映射为 WebSocket 协议",
                page_origin, other
            )));
        }
    };

    let host = origin
        .host_str()
        .ok_or_else(|| WsError::InvalidUrl(format!("页面来源 '{}' 缺少主机名", page_origin)))?;
    let authority = match origin.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    Url::parse(&format!("{}://{}{}", scheme, authority, path))
        .map_err(|e| WsError::InvalidUrl(format!("拼接 WebSocket URL 失败: {}", e)))
}
