//! Gateway: authenticated bidirectional session layer.
//!
//! Each WebSocket connection gets a reader that decodes frames and a writer
//! that drains the connection's outbound queue, so inbound handling is
//! serialized per connection and all socket writes go through one task.
//! Loopback peers are promoted immediately with full permissions; everyone
//! else pairs a token and answers an Ed25519 challenge.

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod handlers;
pub mod router;
pub mod wire;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{EventPayload, Session};
use auth::AuthManager;
use broadcast::BroadcastManager;
use connection::{is_local_addr, ConnectionHandle, ConnectionManager, GatewayConfig, Outbound};
use handlers::GatewayContext;
use router::RpcRouter;
use wire::{Frame, RpcError, CLOSE_AUTH_FAILURE, CLOSE_CONNECTION_CAP, CLOSE_GOING_AWAY};

pub use auth::{AuthManager as Auth, IssuedToken};
pub use connection::GatewayConfig as Config;
pub use handlers::GatewayContext as Context;

/// The session gateway: listener, pools, router, broadcast.
pub struct Gateway {
    config: GatewayConfig,
    context: Arc<GatewayContext>,
    auth: Arc<AuthManager>,
    connections: Arc<ConnectionManager>,
    router: Arc<RpcRouter>,
    accepting: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, context: Arc<GatewayContext>, auth: Arc<AuthManager>) -> Arc<Self> {
        let mut router = RpcRouter::new();
        handlers::register_default_handlers(&mut router, &context);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            connections: context.connections.clone(),
            context,
            auth,
            router: Arc::new(router),
            accepting: AtomicBool::new(true),
            shutdown,
        })
    }

    /// Additional or replacement method registrations (`debug.*`,
    /// `replay.*`, `conversation.*` extensions plug in here).
    pub fn with_router(mut router: RpcRouter, config: GatewayConfig, context: Arc<GatewayContext>, auth: Arc<AuthManager>) -> Arc<Self> {
        handlers::register_default_handlers(&mut router, &context);
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            connections: context.connections.clone(),
            context,
            auth,
            router: Arc::new(router),
            accepting: AtomicBool::new(true),
            shutdown,
        })
    }

    /// Bind and serve until shutdown. Also spawns the heartbeat ticker and
    /// the broadcast worker.
    pub async fn serve(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = addr.as_str(), "gateway listening");

        BroadcastManager::new(self.connections.clone(), self.context.event_bus.clone()).spawn();
        self.spawn_heartbeat();

        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(self.clone())
            .layer(CorsLayer::permissive());

        let mut shutdown_rx = self.shutdown.subscribe();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
        })
        .await?;
        Ok(())
    }

    /// Stop accepting connections and close every session with 1001.
    pub async fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.connections.close_all(CLOSE_GOING_AWAY, "server shutting down").await;
        // Give writers a moment to flush close frames.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = self.shutdown.send(true);
    }

    fn spawn_heartbeat(&self) {
        let connections = self.connections.clone();
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms.max(1));
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = ticker.tick() => connections.heartbeat_round().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }
}

async fn ws_upgrade(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !gateway.accepting.load(Ordering::SeqCst) {
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(gateway, socket, remote_addr))
        .into_response()
}

async fn handle_socket(gateway: Arc<Gateway>, socket: WebSocket, remote_addr: SocketAddr) {
    let local = is_local_addr(remote_addr.ip());
    if !local && !gateway.connections.can_accept_connection(remote_addr).await {
        let (mut sender, _) = socket.split();
        let _ = sender
            .send(WsMessage::Close(Some(CloseFrame {
                code: CLOSE_CONNECTION_CAP,
                reason: "connection cap exceeded".into(),
            })))
            .await;
        return;
    }

    let handle = ConnectionHandle::new(
        remote_addr,
        gateway.config.outbound_queue_capacity,
    );
    let connection_id = handle.id;
    debug!(connection_id = %connection_id, remote = %remote_addr, local, "connection opened");

    gateway.connections.add_pending_connection(handle.clone()).await;
    if local {
        // Loopback auto-auth: promoted immediately with full permissions.
        let session = Session::local(remote_addr);
        let session_id = session.id.clone();
        if gateway
            .connections
            .promote_connection(connection_id, session)
            .await
            .is_ok()
        {
            gateway
                .context
                .event_bus
                .publish(EventPayload::ConnectionAuthenticated { session_id });
        }
    }

    let (mut sender, mut receiver) = socket.split();

    // Writer: the only task that touches the socket's send half.
    let writer_handle = handle.clone();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = writer_handle.outbound.pop().await {
            let result = match outbound {
                Outbound::Frame(json) => sender.send(WsMessage::Text(json.into())).await,
                Outbound::Ping => sender.send(WsMessage::Ping(Vec::new().into())).await,
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Reader: serializes inbound frame handling for this connection.
    while let Some(message) = receiver.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                process_text_frame(&gateway, &handle, text.as_str()).await;
            }
            Ok(WsMessage::Pong(_)) => {
                handle.alive.store(true, Ordering::SeqCst);
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // Teardown: drop from pools, notify, end the writer.
    let session = gateway.connections.handle_disconnect(connection_id).await;
    gateway.auth.forget_connection(connection_id).await;
    if let Some(session) = session {
        gateway
            .context
            .event_bus
            .publish(EventPayload::ConnectionDisconnected {
                session_id: session.id,
            });
    }
    handle.close(CLOSE_GOING_AWAY, "connection closed");
    let _ = writer.await;
    debug!(connection_id = %connection_id, "connection closed");
}

#[derive(Debug, Deserialize)]
struct AuthPairParams {
    token: String,
}

#[derive(Debug, Deserialize)]
struct AuthVerifyParams {
    signature: String,
    public_key: String,
}

async fn process_text_frame(gateway: &Arc<Gateway>, handle: &Arc<ConnectionHandle>, text: &str) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            // Malformed frame: answer -32600 when an id is recoverable,
            // otherwise log and drop.
            if let Ok(value) = serde_json::from_str::<Value>(text) {
                let id = value.get("id").cloned();
                if value["type"] == "req" {
                    if let Some(id) = id {
                        handle.send_frame(&Frame::response_err(id, RpcError::invalid_frame()));
                        return;
                    }
                }
            }
            warn!(connection_id = %handle.id, "unparseable frame dropped");
            return;
        }
    };

    match frame {
        Frame::Request { id, method, params } => {
            handle_request(gateway, handle, id, &method, params).await;
        }
        // Clients do not send responses or events; log and drop.
        Frame::Response { .. } | Frame::Event { .. } => {
            debug!(connection_id = %handle.id, "unexpected frame type dropped");
        }
    }
}

async fn handle_request(
    gateway: &Arc<Gateway>,
    handle: &Arc<ConnectionHandle>,
    id: Value,
    method: &str,
    params: Option<Value>,
) {
    // Pre-auth surface: pairing, verification, and ping.
    match method {
        "auth.pair" => {
            let response = match router::decode_params::<AuthPairParams>(params) {
                Ok(p) => match gateway.auth.issue_challenge(handle.id, &p.token).await {
                    Ok(challenge) => Frame::response_ok(
                        id,
                        serde_json::json!({
                            "challenge": challenge.challenge,
                            "expires_at": challenge.expires_at.to_rfc3339(),
                        }),
                    ),
                    Err(err) => Frame::response_err(id, RpcError::invalid_params(err.to_string())),
                },
                Err(err) => Frame::response_err(id, err),
            };
            handle.send_frame(&response);
            return;
        }
        "auth.verify" => {
            let params = match router::decode_params::<AuthVerifyParams>(params) {
                Ok(p) => p,
                Err(err) => {
                    handle.send_frame(&Frame::response_err(id, err));
                    return;
                }
            };
            match gateway
                .auth
                .verify_signature(handle.id, &params.signature, &params.public_key)
                .await
            {
                Ok(identity) => {
                    let session = Session::new(
                        Uuid::new_v4().to_string(),
                        identity.public_key,
                        identity.permissions.clone(),
                    );
                    let session_id = session.id.clone();
                    match gateway
                        .connections
                        .promote_connection(handle.id, session)
                        .await
                    {
                        Ok(_) => {
                            let permissions: Vec<&str> =
                                identity.permissions.iter().map(|p| p.as_str()).collect();
                            handle.send_frame(&Frame::response_ok(
                                id,
                                serde_json::json!({
                                    "success": true,
                                    "session_id": session_id,
                                    "permissions": permissions,
                                }),
                            ));
                            gateway
                                .context
                                .event_bus
                                .publish(EventPayload::ConnectionAuthenticated { session_id });
                        }
                        Err(_) => {
                            handle.send_frame(&Frame::response_err(id, RpcError::internal()));
                        }
                    }
                }
                Err(err) if err.closes_connection() => {
                    warn!(connection_id = %handle.id, error = %err, "auth.verify failed, closing");
                    handle.send_frame(&Frame::response_err(
                        id,
                        RpcError::unauthorized().with_data(serde_json::json!("auth_failed")),
                    ));
                    handle.close(CLOSE_AUTH_FAILURE, "authentication failed");
                    gateway.connections.handle_disconnect(handle.id).await;
                }
                Err(err) => {
                    // Challenge replay: invalid params, connection stays open.
                    handle.send_frame(&Frame::response_err(
                        id,
                        RpcError::invalid_params(err.to_string()),
                    ));
                }
            }
            return;
        }
        "system.ping" => {
            handle.send_frame(&Frame::response_ok(
                id,
                serde_json::json!({ "pong": chrono::Utc::now().timestamp_millis() }),
            ));
            return;
        }
        _ => {}
    }

    // Everything else requires an authenticated session.
    let Some(mut session) = handle.session().await else {
        handle.send_frame(&Frame::response_err(id, RpcError::unauthorized()));
        return;
    };
    session.touch();

    let response = match gateway.router.dispatch(method, params, &session).await {
        Ok(result) => Frame::response_ok(id, result),
        Err(err) => Frame::response_err(id, err),
    };
    handle.send_frame(&response);
}
