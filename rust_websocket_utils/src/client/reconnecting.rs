// rust_websocket_utils/src/client/reconnecting.rs

//! 自动重连的客户端 WebSocket。
//!
//! `ReconnectingSocket` 在一个随时可能断开的传输之上提供"持续连接的事件流"：
//!
//! ```text
//! Disconnected ──连接──▶ Connecting ──握手成功──▶ Connected
//!      ▲                    │                        │
//!      └──── 固定间隔后重试 ◀┴──── 失败 / 断开 ◀──────┘
//!
//! 任意状态 ──close()──▶ Closed（终态）
//! ```
//!
//! 所有连接尝试、收发循环与重连等待都在同一个后台驱动任务中顺序执行，
//! 因此任意时刻最多只有一个重连计时器。`close()` 通知驱动任务退出并等待其结束，
//! 返回后不会再有连接尝试或回调发生。
//!
//! 收到的文本帧按 `T` 解析，解析失败的帧被丢弃；成功解析的消息先按订阅顺序
//! 交给各个回调，再更新 `last_message`。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use super::transport::{ClientConnection, connect_client_with_timeout, receive_text};
use crate::error::WsError;
use crate::message::{encode_frame, parse_frame};

/// 默认重连间隔（固定间隔，不做指数退避）。
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);

/// 默认单次连接（含握手）超时。
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// 关闭时发送 Close 帧的最长等待
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// 重连客户端的配置。
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// 完整的 `ws://` 或 `wss://` 地址。
    pub url: String,
    /// 每次失败或断开后，到下一次连接尝试之间的固定间隔。
    pub reconnect_interval: Duration,
    /// 单次连接尝试的超时，`None` 表示不限时。
    pub connect_timeout: Option<Duration>,
}

impl ReconnectConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// 重连客户端的连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// 未连接，等待下一次连接尝试。
    Disconnected,
    /// 正在建立连接。
    Connecting,
    /// 连接已建立，正在接收消息。
    Connected,
    /// 已被调用方关闭，终态。
    Closed,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

fn lock<X>(mutex: &Mutex<X>) -> MutexGuard<'_, X> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 驱动任务与句柄共享的状态。
struct Shared<T> {
    state: watch::Sender<SocketState>,
    last_message: watch::Sender<Option<T>>,
    subscribers: Mutex<Vec<(u64, Callback<T>)>>,
    next_subscriber_id: AtomicU64,
    // 仅在 Connected 期间存在；断开即丢弃，未发送的帧随之作废
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected_since: Mutex<Option<DateTime<Utc>>>,
    connect_attempts: AtomicU64,
}

impl<T> Shared<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// 切换状态。进入 Closed 之后不再发生任何转换。
    fn set_state(&self, next: SocketState) {
        self.state.send_if_modified(|current| {
            if *current == SocketState::Closed || *current == next {
                return false;
            }
            debug!("重连客户端：状态 {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }

    fn mark_closed(&self) {
        lock(&self.outbound).take();
        lock(&self.connected_since).take();
        self.state.send_replace(SocketState::Closed);
    }

    fn handle_text(&self, text: &str) {
        let Some(message) = parse_frame::<T>(text) else {
            return;
        };

        // 先复制回调列表再释放锁，回调内部可以安全地订阅或退订
        let callbacks: Vec<Callback<T>> = lock(&self.subscribers)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
                error!("重连客户端：消息回调发生 panic，已忽略");
            }
        }

        // 回调全部执行完毕后才对 last_message 的观察者可见
        self.last_message.send_replace(Some(message));
    }
}

enum PumpOutcome {
    Dropped,
    Shutdown,
}

/// 订阅句柄。调用 [`Subscription::unsubscribe`] 或丢弃句柄即退订。
#[must_use = "丢弃 Subscription 会立即退订"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// 退订。返回后该回调不会再被新到达的消息触发。
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// 自动重连的 WebSocket 客户端，收到的消息按 `T` 解析。
pub struct ReconnectingSocket<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    config: ReconnectConfig,
    shared: Arc<Shared<T>>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T> ReconnectingSocket<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// 创建客户端并立即在后台开始第一次连接尝试。
    ///
    /// 必须在 Tokio 运行时中调用。
    ///
    /// # Errors
    /// URL 无法解析或协议不是 `ws`/`wss` 时返回 `WsError::InvalidUrl`，此时不会启动后台任务。
    pub fn open(config: ReconnectConfig) -> Result<Self, WsError> {
        let url = Url::parse(&config.url)
            .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", config.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(WsError::InvalidUrl(format!(
                "不支持的协议 '{}'，WebSocket URL 必须以 ws:// 或 wss:// 开头",
                url.scheme()
            )));
        }

        let (state, _) = watch::channel(SocketState::Disconnected);
        let (last_message, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            state,
            last_message,
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
            outbound: Mutex::new(None),
            connected_since: Mutex::new(None),
            connect_attempts: AtomicU64::new(0),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(
            "重连客户端：启动，目标 {}，重连间隔 {:?}",
            config.url, config.reconnect_interval
        );
        let driver = tokio::spawn(run_driver(Arc::clone(&shared), config.clone(), shutdown_rx));

        Ok(Self {
            config,
            shared,
            shutdown,
            driver: Mutex::new(Some(driver)),
        })
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn state(&self) -> SocketState {
        *self.shared.state.borrow()
    }

    /// 仪表盘"已连接"指示。
    pub fn is_connected(&self) -> bool {
        self.state() == SocketState::Connected
    }

    /// 订阅状态变化。
    pub fn watch_state(&self) -> watch::Receiver<SocketState> {
        self.shared.state.subscribe()
    }

    /// 最近一次成功解析的消息。重连不会清空它。
    pub fn last_message(&self) -> Option<T> {
        self.shared.last_message.borrow().clone()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<T>> {
        self.shared.last_message.subscribe()
    }

    /// 当前连接建立的时间；未连接时为 `None`。
    pub fn connected_since(&self) -> Option<DateTime<Utc>> {
        *lock(&self.shared.connected_since)
    }

    /// 自创建以来发起的连接尝试总数。
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// 注册消息回调，返回订阅句柄。
    ///
    /// 回调在后台驱动任务中同步执行，不应阻塞。
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.subscribers).push((id, Arc::new(callback)));
        debug!("重连客户端：新增订阅 #{}", id);

        let shared = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                lock(&shared.subscribers).retain(|(subscriber_id, _)| *subscriber_id != id);
                debug!("重连客户端：订阅 #{} 已退订", id);
            }
        })
    }

    /// 当前订阅者数量。
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).len()
    }

    /// 编码并发送一条消息。
    ///
    /// # Returns
    /// * `Ok(true)` - 已交给当前连接发送。
    /// * `Ok(false)` - 当前未连接，消息被丢弃（不会排队等到重连后再发）。
    /// * `Err(WsError::SerializationError)` - 消息无法编码为带 `type` 字段的帧。
    pub fn send<S: Serialize>(&self, message: &S) -> Result<bool, WsError> {
        let frame = encode_frame(message)?;
        Ok(self.send_text(frame))
    }

    /// 发送一帧原始文本，语义同 [`send`](Self::send)。
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let outbound = lock(&self.shared.outbound);
        match outbound.as_ref() {
            Some(sender) => sender.send(text.into()).is_ok(),
            None => {
                debug!("重连客户端：当前未连接，丢弃待发送的帧");
                false
            }
        }
    }

    /// 关闭客户端：取消待执行的重连、关闭活动连接并等待后台任务结束。
    ///
    /// 可重复调用。返回后状态固定为 `Closed`，不会再有连接尝试或回调。
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        self.shared.mark_closed();

        let driver = lock(&self.driver).take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                if !e.is_cancelled() {
                    error!("重连客户端：后台任务异常结束: {}", e);
                }
            }
            info!("重连客户端：已关闭 ({})", self.config.url);
        }
    }
}

impl<T> Drop for ReconnectingSocket<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.shared.mark_closed();
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
    }
}

async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    // 发送端被丢弃同样视为关闭
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run_driver<T>(shared: Arc<Shared<T>>, config: ReconnectConfig, mut shutdown: watch::Receiver<bool>)
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let mut consecutive_failures: u64 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.set_state(SocketState::Connecting);
        let attempt = shared.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("重连客户端：第 {} 次连接尝试 {}", attempt, config.url);

        let connected = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => break,
            result = connect_client_with_timeout(&config.url, config.connect_timeout) => result,
        };

        match connected {
            Ok(connection) => {
                consecutive_failures = 0;
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                *lock(&shared.outbound) = Some(outbound_tx);
                *lock(&shared.connected_since) = Some(Utc::now());
                shared.set_state(SocketState::Connected);
                info!("重连客户端：已连接 {}", config.url);

                let outcome = pump(connection, outbound_rx, &shared, &mut shutdown).await;

                lock(&shared.outbound).take();
                lock(&shared.connected_since).take();
                if matches!(outcome, PumpOutcome::Shutdown) {
                    break;
                }
                warn!(
                    "重连客户端：连接 {} 已断开，{:?} 后重连",
                    config.url, config.reconnect_interval
                );
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "重连客户端：连接 {} 失败 (连续第 {} 次): {}，{:?} 后重试",
                    config.url, consecutive_failures, e, config.reconnect_interval
                );
            }
        }

        shared.set_state(SocketState::Disconnected);

        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown) => break,
            _ = tokio::time::sleep(config.reconnect_interval) => {}
        }
    }

    shared.mark_closed();
    debug!("重连客户端：后台任务退出");
}

async fn pump<T>(
    mut connection: ClientConnection,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: &Shared<T>,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpOutcome
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown_signalled(shutdown) => {
                close_quietly(&mut connection).await;
                return PumpOutcome::Shutdown;
            }
            queued = outbound.recv() => match queued {
                Some(text) => {
                    if let Err(e) = connection.send_text(text).await {
                        warn!("重连客户端：发送失败，连接视为断开: {}", e);
                        return PumpOutcome::Dropped;
                    }
                }
                // 只有 close() 会在连接期间取走发送端
                None => {
                    close_quietly(&mut connection).await;
                    return PumpOutcome::Shutdown;
                }
            },
            incoming = receive_text(&mut connection.ws_receiver) => match incoming {
                Some(Ok(text)) => shared.handle_text(&text),
                Some(Err(e)) => {
                    warn!("重连客户端：接收失败: {}", e);
                    return PumpOutcome::Dropped;
                }
                None => {
                    info!("重连客户端：服务端关闭了连接");
                    return PumpOutcome::Dropped;
                }
            },
        }
    }
}

async fn close_quietly(connection: &mut ClientConnection) {
    match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, connection.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("重连客户端：发送 Close 帧失败: {}", e),
        Err(_) => debug!("重连客户端：发送 Close 帧超时"),
    }
}
