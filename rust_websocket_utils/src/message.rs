// rust_websocket_utils/src/message.rs

//! 文本帧的编码与解码。
//!
//! 通道上的每一帧都是 UTF-8 JSON 文本，顶层为对象且必须带有字符串类型的 `type` 字段，
//! 其余字段由 `type` 决定。本模块负责：
//! - 将实现了 `Serialize` 的事件编码为文本帧，并校验 `type` 判别字段存在；
//! - 将收到的文本帧解码为调用方指定的强类型消息。
//!
//! 客户端侧使用 [`parse_frame`]：解析失败的帧（心跳串、非 JSON 文本、未知类型）
//! 被静默丢弃，只留下一条 debug 日志，不会作为错误向上传播。

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::WsError;

/// 帧中判别字段的名称。
pub const TYPE_FIELD: &str = "type";

/// 将事件编码为一帧 JSON 文本。
///
/// # Returns
/// * `Ok(String)` - 编码后的文本帧。
/// * `Err(WsError::SerializationError)` - 序列化失败，或结果不是带 `type` 字段的 JSON 对象。
pub fn encode_frame<T: Serialize>(event: &T) -> Result<String, WsError> {
    let value = serde_json::to_value(event)
        .map_err(|e| WsError::SerializationError(format!("事件序列化失败: {}", e)))?;

    match value.get(TYPE_FIELD) {
        Some(Value::String(_)) => {}
        _ => {
            return Err(WsError::SerializationError(format!(
                "事件缺少字符串类型的 `{}` 字段: {}",
                TYPE_FIELD, value
            )));
        }
    }

    serde_json::to_string(&value)
        .map_err(|e| WsError::SerializationError(format!("事件序列化失败: {}", e)))
}

/// 严格解码一帧文本，失败时返回 `WsError::DeserializationError`。
pub fn decode_frame<T: DeserializeOwned>(text: &str) -> Result<T, WsError> {
    serde_json::from_str(text).map_err(|e| {
        WsError::DeserializationError(format!("文本帧反序列化失败: {}, 原始文本: '{}'", e, text))
    })
}

/// 宽松解码一帧文本：无法解析的帧返回 `None`。
pub fn parse_frame<T: DeserializeOwned>(text: &str) -> Option<T> {
    match decode_frame(text) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("丢弃无法解析的文本帧: {}", e);
            None
        }
    }
}

/// 读取帧的 `type` 字段而不做完整解码。
pub fn frame_type(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get(TYPE_FIELD)?.as_str().map(str::to_owned)
}
