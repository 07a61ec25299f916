//! Connection pools, outbound queues, and heartbeat.
//!
//! Every connection owns one outbound queue; all writes to the socket are
//! serialized through it. Broadcast events are droppable: when the queue is
//! full the oldest undelivered event is replaced by a `session.lagged`
//! marker. Responses, pings, and close commands are never dropped.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Session, Subscription};
use crate::gateway::wire::{Frame, CLOSE_AUTH_FAILURE};

/// Gateway listener and connection tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_queue_capacity: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}
fn default_max_connections_per_ip() -> usize {
    10
}
fn default_auth_timeout_ms() -> u64 {
    30_000
}
fn default_outbound_capacity() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            max_connections_per_ip: default_max_connections_per_ip(),
            auth_timeout_ms: default_auth_timeout_ms(),
            outbound_queue_capacity: default_outbound_capacity(),
        }
    }
}

/// True for loopback peers: `127.0.0.1`, `::1`, and IPv4-mapped
/// `::ffff:127.*` (the `localhost` literal resolves to one of these).
pub fn is_local_addr(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// One message bound for the socket.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(String),
    Ping,
    Close { code: u16, reason: String },
}

struct QueueItem {
    message: Outbound,
    droppable: bool,
    lag_marker: bool,
}

struct QueueInner {
    items: VecDeque<QueueItem>,
    closed: bool,
    dropped_total: u64,
    lag_marker_queued: bool,
}

/// Bounded per-connection outbound queue with oldest-event drop.
pub struct OutboundQueue {
    capacity: usize,
    inner: std::sync::Mutex<QueueInner>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            inner: std::sync::Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
                dropped_total: 0,
                lag_marker_queued: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue a non-droppable message (response, ping, close).
    pub fn push_control(&self, message: Outbound) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.closed {
            return;
        }
        if let Outbound::Close { .. } = message {
            inner.closed = true;
        }
        inner.items.push_back(QueueItem {
            message,
            droppable: false,
            lag_marker: false,
        });
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue a broadcast event. At capacity, the oldest droppable event is
    /// removed and a single `session.lagged` marker takes its place.
    pub fn push_event(&self, frame_json: String) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.closed {
            return;
        }
        if inner.items.len() >= self.capacity {
            let oldest = inner.items.iter().position(|i| i.droppable);
            if let Some(position) = oldest {
                inner.items.remove(position);
                inner.dropped_total += 1;
                if !inner.lag_marker_queued {
                    let dropped = inner.dropped_total;
                    let marker = Frame::event(
                        "session.lagged",
                        serde_json::json!({ "dropped": dropped }),
                    )
                    .to_json();
                    inner.items.insert(
                        position,
                        QueueItem {
                            message: Outbound::Frame(marker),
                            droppable: true,
                            lag_marker: true,
                        },
                    );
                    inner.lag_marker_queued = true;
                }
            }
        }
        inner.items.push_back(QueueItem {
            message: Outbound::Frame(frame_json),
            droppable: true,
            lag_marker: false,
        });
        drop(inner);
        self.notify.notify_one();
    }

    /// Dequeue the next message; resolves `None` once closed and drained.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            {
                let Ok(mut inner) = self.inner.lock() else {
                    return None;
                };
                if let Some(item) = inner.items.pop_front() {
                    if item.lag_marker {
                        inner.lag_marker_queued = false;
                    }
                    return Some(item.message);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn dropped_total(&self) -> u64 {
        self.inner.lock().map(|i| i.dropped_total).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One live connection: socket identity, outbound queue, liveness flag, and
/// the session slot filled at promotion.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub remote_addr: SocketAddr,
    pub outbound: OutboundQueue,
    /// Heartbeat flag: ping clears it, pong sets it.
    pub alive: AtomicBool,
    session: RwLock<Option<Session>>,
}

impl ConnectionHandle {
    pub fn new(remote_addr: SocketAddr, outbound_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            remote_addr,
            outbound: OutboundQueue::new(outbound_capacity),
            alive: AtomicBool::new(true),
            session: RwLock::new(None),
        })
    }

    pub fn send_frame(&self, frame: &Frame) {
        self.outbound.push_control(Outbound::Frame(frame.to_json()));
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.outbound.push_control(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn set_session(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    /// Update this connection's broadcast filter.
    pub async fn set_subscription(&self, subscription: Option<Subscription>) {
        if let Some(session) = self.session.write().await.as_mut() {
            session.subscription = subscription;
        }
    }
}

/// Pending and authenticated connection pools.
pub struct ConnectionManager {
    /// Self-handle for arming auth-timeout tasks from `&self`.
    me: std::sync::Weak<ConnectionManager>,
    config: GatewayConfig,
    pending: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
    authenticated: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
}

impl ConnectionManager {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            pending: RwLock::new(HashMap::new()),
            authenticated: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Per-IP cap applies to unpromoted connections.
    pub async fn can_accept_connection(&self, remote_addr: SocketAddr) -> bool {
        let pending = self.pending.read().await;
        let from_ip = pending
            .values()
            .filter(|h| h.remote_addr.ip() == remote_addr.ip())
            .count();
        from_ip < self.config.max_connections_per_ip
    }

    /// Track a new unauthenticated connection and arm its auth timeout.
    pub async fn add_pending_connection(&self, handle: Arc<ConnectionHandle>) {
        self.pending.write().await.insert(handle.id, handle.clone());

        let Some(manager) = self.me.upgrade() else {
            return;
        };
        let connection_id = handle.id;
        let timeout = Duration::from_millis(self.config.auth_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let still_pending = manager.pending.read().await.contains_key(&connection_id);
            if still_pending {
                if let Some(handle) = manager.pending.write().await.remove(&connection_id) {
                    warn!(connection_id = %connection_id, "auth timeout, closing");
                    handle.close(CLOSE_AUTH_FAILURE, "authentication timeout");
                }
            }
        });
    }

    /// Move a connection to the authenticated pool with its session.
    pub async fn promote_connection(
        &self,
        connection_id: Uuid,
        session: Session,
    ) -> DomainResult<Arc<ConnectionHandle>> {
        let handle = self
            .pending
            .write()
            .await
            .remove(&connection_id)
            .ok_or_else(|| {
                DomainError::ValidationFailed(format!("unknown pending connection {connection_id}"))
            })?;
        handle.set_session(session).await;
        self.authenticated
            .write()
            .await
            .insert(connection_id, handle.clone());
        info!(connection_id = %connection_id, "connection promoted");
        Ok(handle)
    }

    /// Remove a connection from whichever pool holds it; returns its session
    /// if it was authenticated.
    pub async fn handle_disconnect(&self, connection_id: Uuid) -> Option<Session> {
        self.pending.write().await.remove(&connection_id);
        let handle = self.authenticated.write().await.remove(&connection_id)?;
        handle.session().await
    }

    pub async fn authenticated_handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.authenticated.read().await.values().cloned().collect()
    }

    pub async fn counts(&self) -> (usize, usize) {
        (
            self.pending.read().await.len(),
            self.authenticated.read().await.len(),
        )
    }

    pub async fn find_by_session(&self, session_id: &str) -> Option<Arc<ConnectionHandle>> {
        for handle in self.authenticated.read().await.values() {
            if let Some(session) = handle.session().await {
                if session.id == session_id {
                    return Some(handle.clone());
                }
            }
        }
        None
    }

    /// One heartbeat round: terminate connections that missed the previous
    /// ping, then ping everyone else.
    pub async fn heartbeat_round(&self) {
        let handles: Vec<Arc<ConnectionHandle>> = {
            let pending = self.pending.read().await;
            let authenticated = self.authenticated.read().await;
            pending
                .values()
                .chain(authenticated.values())
                .cloned()
                .collect()
        };
        for handle in handles {
            if handle.alive.swap(false, Ordering::SeqCst) {
                handle.outbound.push_control(Outbound::Ping);
            } else {
                debug!(connection_id = %handle.id, "heartbeat missed, terminating");
                handle.close(crate::gateway::wire::CLOSE_NORMAL, "heartbeat timeout");
                self.handle_disconnect(handle.id).await;
            }
        }
    }

    /// Close every connection (server shutdown path).
    pub async fn close_all(&self, code: u16, reason: &str) {
        let handles: Vec<Arc<ConnectionHandle>> = {
            let pending = self.pending.read().await;
            let authenticated = self.authenticated.read().await;
            pending
                .values()
                .chain(authenticated.values())
                .cloned()
                .collect()
        };
        for handle in handles {
            handle.close(code, reason);
        }
        self.pending.write().await.clear();
        self.authenticated.write().await.clear();
    }
}
