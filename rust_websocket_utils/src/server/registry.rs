// rust_websocket_utils/src/server/registry.rs

//! 连接注册表：按频道维护活动连接，并负责广播。
//!
//! `ConnectionRegistry` 由服务端在启动时显式创建，通过 `Arc` 注入到各个连接处理任务和
//! 广播分发器中，服务停止时调用 [`ConnectionRegistry::shutdown`] 关闭全部连接。
//! 它不是进程级的全局单例，测试中可以随意构造相互独立的实例。
//!
//! # 并发语义
//! - 频道到连接集合的映射使用 `DashMap`，注册、注销、广播可以在不同任务中并发进行。
//! - 广播在开始时对频道内的连接做一次快照，随后在不持有映射锁的情况下逐个投递。
//!   快照之后才注册的连接不会收到本次广播。
//! - 每个注册项带有一个存活标记。投递在该标记的锁内进行，注销时先从映射中移除、
//!   再在同一把锁内清除标记。因此 `unregister` 返回之后，该连接不会再收到任何广播，
//!   即使它仍出现在某个进行中的广播快照里。
//! - 单个连接投递失败（连接已关闭、出站队列已满）只影响它自己：记录日志、注销并关闭该连接，
//!   其余连接照常投递，错误不会传递给 `broadcast` 的调用方。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::WsError;

/// 连接的唯一标识，由连接在创建时生成。
pub type ConnectionId = Uuid;

/// 注册表可以投递文本帧的一个连接。
///
/// 服务端的实际实现是 [`QueuedConnection`](super::connection::QueuedConnection)，
/// 它把帧放入出站队列，由连接自己的 I/O 任务写入 WebSocket。
pub trait Connection: Send + Sync {
    /// 连接的唯一标识。
    fn id(&self) -> ConnectionId;

    /// 投递一帧文本。返回错误表示该连接已不可用，注册表会将其注销。
    fn deliver(&self, frame: &str) -> Result<(), WsError>;

    /// 请求关闭底层传输。默认不做任何事。
    fn close(&self) {}
}

/// 一次广播的投递结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// 成功投递的连接数。
    pub delivered: usize,
    /// 投递失败并因此被注销的连接数。
    pub failed: usize,
}

/// 注册项：连接句柄加存活标记。
struct Slot {
    connection: Arc<dyn Connection>,
    live: Mutex<bool>,
}

impl Slot {
    fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            live: Mutex::new(true),
        }
    }

    /// 在存活标记的锁内投递。已注销的注册项返回 `Ok(false)`。
    fn deliver(&self, frame: &str) -> Result<bool, WsError> {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if !*live {
            return Ok(false);
        }
        self.connection.deliver(frame).map(|_| true)
    }

    /// 清除存活标记，返回清除前的值。
    fn retire(&self) -> bool {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *live, false)
    }
}

/// 按频道管理所有活动连接。
pub struct ConnectionRegistry {
    channels: DashMap<String, DashMap<ConnectionId, Arc<Slot>>>,
    closed: AtomicBool,
}

impl ConnectionRegistry {
    /// 创建一个空的注册表。
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// 将连接注册到频道。
    ///
    /// 连接标识由连接自身保证唯一，这里不做重复检测。
    /// 注册表已关闭时返回 `WsError::RegistryClosed`，并关闭传入的连接。
    pub fn register(&self, channel: &str, connection: Arc<dyn Connection>) -> Result<(), WsError> {
        if self.is_closed() {
            connection.close();
            return Err(WsError::RegistryClosed);
        }

        let id = connection.id();
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(id, Arc::new(Slot::new(connection)));

        // 与 shutdown 并发时，shutdown 可能已经清空过映射
        if self.is_closed() {
            if let Some(connection) = self.take(channel, &id) {
                connection.close();
            }
            return Err(WsError::RegistryClosed);
        }

        info!("连接 {} 已注册到频道 '{}'，当前活动连接总数: {}", id, channel, self.connection_count());
        Ok(())
    }

    /// 从频道中注销连接。幂等：连接不存在时什么也不做。
    ///
    /// # Returns
    /// 本次调用是否真正移除了连接。
    pub fn unregister(&self, channel: &str, id: &ConnectionId) -> bool {
        self.take(channel, id).is_some()
    }

    /// 移除并停用注册项，返回其连接句柄。
    fn take(&self, channel: &str, id: &ConnectionId) -> Option<Arc<dyn Connection>> {
        let removed = self
            .channels
            .get(channel)
            .and_then(|connections| connections.remove(id));

        // 频道为空时一并移除，remove_if 在分片写锁内检查，不会误删并发注册的连接
        self.channels.remove_if(channel, |_, connections| connections.is_empty());

        let (_, slot) = removed?;
        slot.retire();
        debug!("连接 {} 已从频道 '{}' 注销", id, channel);
        Some(Arc::clone(&slot.connection))
    }

    /// 向频道内的全部连接广播一帧文本。
    ///
    /// 投递范围是广播开始时已注册的连接。失败的连接会被注销并关闭，
    /// 不影响对其他连接的投递。
    pub fn broadcast(&self, channel: &str, frame: &str) -> BroadcastReport {
        let snapshot: Vec<(ConnectionId, Arc<Slot>)> = match self.channels.get(channel) {
            Some(connections) => connections
                .iter()
                .map(|entry| (*entry.key(), Arc::clone(entry.value())))
                .collect(),
            None => return BroadcastReport::default(),
        };

        let mut report = BroadcastReport::default();
        for (id, slot) in snapshot {
            match slot.deliver(frame) {
                Ok(true) => report.delivered += 1,
                Ok(false) => {} // 快照之后已被注销
                Err(e) => {
                    warn!("向频道 '{}' 的连接 {} 投递失败，注销该连接: {}", channel, id, e);
                    report.failed += 1;
                    self.unregister(channel, &id);
                    slot.connection.close();
                }
            }
        }

        debug!(
            "频道 '{}' 广播完成: 成功 {}，失败 {}",
            channel, report.delivered, report.failed
        );
        report
    }

    /// 频道内是否存在指定连接。
    pub fn contains(&self, channel: &str, id: &ConnectionId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|connections| connections.contains_key(id))
    }

    /// 频道内的连接数。
    pub fn channel_len(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |connections| connections.len())
    }

    /// 所有频道的活动连接总数。
    pub fn connection_count(&self) -> usize {
        self.channels.iter().map(|entry| entry.value().len()).sum()
    }

    /// 当前至少有一个连接的频道名称（无固定顺序）。
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// 各频道名称及其连接数。
    pub fn channel_counts(&self) -> Vec<(String, usize)> {
        self.channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 关闭注册表：注销并关闭全部连接，此后的注册请求都会被拒绝。
    ///
    /// # Returns
    /// 被关闭的连接数。
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let mut closed = 0;
        for channel in self.channels() {
            if let Some((_, connections)) = self.channels.remove(&channel) {
                for (_, slot) in connections {
                    if slot.retire() {
                        slot.connection.close();
                        closed += 1;
                    }
                }
            }
        }
        info!("连接注册表已关闭，共关闭 {} 个连接。", closed);
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// 记录收到的帧的测试连接，可配置为投递失败。
    struct RecordingConnection {
        id: ConnectionId,
        fail: bool,
        frames: Mutex<Vec<String>>,
        attempts: AtomicUsize,
        closed: AtomicBool,
    }

    impl RecordingConnection {
        fn new() -> Arc<Self> {
            Self::with_failure(false)
        }

        fn failing() -> Arc<Self> {
            Self::with_failure(true)
        }

        fn with_failure(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                fail,
                frames: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            })
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl Connection for RecordingConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn deliver(&self, frame: &str) -> Result<(), WsError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WsError::SendErrorClosed);
            }
            self.frames.lock().unwrap().push(frame.to_string());
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_broadcast_isolates_failing_connection() {
        let registry = ConnectionRegistry::new();
        let first = RecordingConnection::new();
        let second = RecordingConnection::failing();
        let third = RecordingConnection::new();
        registry.register("dashboard", first.clone()).unwrap();
        registry.register("dashboard", second.clone()).unwrap();
        registry.register("dashboard", third.clone()).unwrap();

        let report = registry.broadcast("dashboard", r#"{"type":"stats"}"#);

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });
        assert_eq!(first.frames(), vec![r#"{"type":"stats"}"#.to_string()]);
        assert_eq!(third.frames(), vec![r#"{"type":"stats"}"#.to_string()]);
        assert!(!registry.contains("dashboard", &second.id));
        assert!(second.closed.load(Ordering::SeqCst), "失败的连接应被关闭");

        // 后续广播不再尝试投递给失败的连接
        let report = registry.broadcast("dashboard", r#"{"type":"alert"}"#);
        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        assert_eq!(second.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(first.frames().len(), 2);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let keep = RecordingConnection::new();
        let gone = RecordingConnection::new();
        registry.register("dashboard", keep.clone()).unwrap();
        registry.register("dashboard", gone.clone()).unwrap();

        assert!(registry.unregister("dashboard", &gone.id));
        let after_first = (registry.connection_count(), registry.channels());
        assert!(!registry.unregister("dashboard", &gone.id));
        assert_eq!((registry.connection_count(), registry.channels()), after_first);
        assert!(registry.contains("dashboard", &keep.id));

        // 从未注册过的频道也不会出错
        assert!(!registry.unregister("status", &gone.id));
    }

    #[test]
    fn test_unregistered_connection_receives_nothing() {
        let registry = ConnectionRegistry::new();
        let conn = RecordingConnection::new();
        registry.register("status", conn.clone()).unwrap();
        registry.unregister("status", &conn.id);

        let report = registry.broadcast("status", r#"{"type":"heartbeat"}"#);
        assert_eq!(report, BroadcastReport::default());
        assert!(conn.frames().is_empty());
    }

    #[test]
    fn test_retired_slot_skips_delivery_from_stale_snapshot() {
        let conn = RecordingConnection::new();
        let slot = Slot::new(conn.clone());
        assert!(slot.retire());
        assert!(!slot.deliver("x").unwrap());
        assert!(!slot.retire());
        assert_eq!(conn.attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_channels_are_isolated_and_empty_channels_dropped() {
        let registry = ConnectionRegistry::new();
        let dash = RecordingConnection::new();
        let telemetry = RecordingConnection::new();
        registry.register("dashboard", dash.clone()).unwrap();
        registry.register("telemetry:UAV-01", telemetry.clone()).unwrap();

        registry.broadcast("telemetry:UAV-01", r#"{"type":"telemetry"}"#);
        assert!(dash.frames().is_empty());
        assert_eq!(telemetry.frames().len(), 1);
        assert_eq!(registry.channel_len("telemetry:UAV-01"), 1);

        registry.unregister("telemetry:UAV-01", &telemetry.id);
        assert_eq!(registry.channels(), vec!["dashboard".to_string()]);
        assert_eq!(registry.broadcast("nobody", "{}"), BroadcastReport::default());
    }

    #[test]
    fn test_shutdown_closes_everything_and_rejects_new_connections() {
        let registry = ConnectionRegistry::new();
        let a = RecordingConnection::new();
        let b = RecordingConnection::new();
        registry.register("dashboard", a.clone()).unwrap();
        registry.register("status", b.clone()).unwrap();

        assert_eq!(registry.shutdown(), 2);
        assert!(a.closed.load(Ordering::SeqCst));
        assert!(b.closed.load(Ordering::SeqCst));
        assert_eq!(registry.connection_count(), 0);

        let late = RecordingConnection::new();
        assert!(matches!(
            registry.register("dashboard", late.clone()),
            Err(WsError::RegistryClosed)
        ));
        assert!(late.closed.load(Ordering::SeqCst));
    }

    /// 在注册过程中读取标识时关闭注册表，模拟与 `shutdown` 并发的注册。
    struct ShutdownDuringRegister {
        registry: Arc<ConnectionRegistry>,
        inner: Arc<RecordingConnection>,
    }

    impl Connection for ShutdownDuringRegister {
        fn id(&self) -> ConnectionId {
            self.registry.shutdown();
            self.inner.id
        }

        fn deliver(&self, frame: &str) -> Result<(), WsError> {
            self.inner.deliver(frame)
        }

        fn close(&self) {
            self.inner.close();
        }
    }

    #[test]
    fn test_register_racing_shutdown_closes_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let inner = RecordingConnection::new();
        let racing = Arc::new(ShutdownDuringRegister {
            registry: Arc::clone(&registry),
            inner: inner.clone(),
        });

        assert!(matches!(
            registry.register("dashboard", racing),
            Err(WsError::RegistryClosed)
        ));
        assert!(inner.closed.load(Ordering::SeqCst), "被拒绝的连接应被关闭");
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.channels().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister_and_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new());
        let stable = RecordingConnection::new();
        registry.register("dashboard", stable.clone()).unwrap();

        let mut churners = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            churners.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let conn = RecordingConnection::new();
                    registry.register("dashboard", conn.clone()).unwrap();
                    tokio::task::yield_now().await;
                    registry.unregister("dashboard", &conn.id);
                    let seen = conn.frames().len();
                    tokio::task::yield_now().await;
                    // 注销之后不再收到任何帧
                    assert_eq!(conn.frames().len(), seen);
                }
            }));
        }

        let broadcaster = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..500 {
                    registry.broadcast("dashboard", r#"{"type":"stats"}"#);
                    tokio::task::yield_now().await;
                }
            })
        };

        for churner in churners {
            churner.await.unwrap();
        }
        broadcaster.await.unwrap();

        assert_eq!(stable.frames().len(), 500);
        assert_eq!(registry.connection_count(), 1);
    }
}
