// rust_websocket_utils/src/server/connection.rs

//! 基于有界出站队列的服务端连接。
//!
//! 注册表的广播是同步的，不能在持有注册项锁时等待网络 I/O。
//! `QueuedConnection` 因此只把帧放进一个有界的 Tokio MPSC 队列，
//! 由该连接自己的会话任务从队列中取出并写入 WebSocket。
//!
//! 关闭连接时丢弃队列的发送端：会话任务的 `recv()` 随即返回 `None`，
//! 据此结束循环并关闭底层传输。

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use super::registry::{Connection, ConnectionId};
use crate::error::WsError;

/// 出站队列的默认容量。
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// 由出站队列驱动的连接句柄。
#[derive(Debug)]
pub struct QueuedConnection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    capacity: usize,
    sender: Mutex<Option<mpsc::Sender<String>>>,
}

impl QueuedConnection {
    /// 创建连接句柄及其出站队列的接收端。
    ///
    /// # Arguments
    /// * `peer_addr` - 对端地址（可能未知）。
    /// * `capacity` - 出站队列容量，至少为 1。
    pub fn new(peer_addr: Option<SocketAddr>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            peer_addr,
            connected_at: Utc::now(),
            capacity,
            sender: Mutex::new(Some(sender)),
        });
        (connection, receiver)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// 连接是否已被关闭（队列发送端已丢弃）。
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|sender| sender.is_closed())
    }
}

impl Connection for QueuedConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn deliver(&self, frame: &str) -> Result<(), WsError> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(WsError::SendErrorClosed);
        };
        match sender.try_send(frame.to_string()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(WsError::OutboundQueueFull(self.capacity)),
            Err(TrySendError::Closed(_)) => Err(WsError::SendErrorClosed),
        }
    }

    fn close(&self) {
        if self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("连接 {} 的出站队列已关闭", self.id);
        }
    }
}
