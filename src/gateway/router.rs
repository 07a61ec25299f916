//! RPC method router.
//!
//! Handlers are registered with a method name and a required permission set;
//! dispatch resolves the route, enforces permissions against the calling
//! session, and normalizes every failure into a wire error. Handlers receive
//! typed params via [`decode_params`] — the generic map stops at the handler
//! boundary.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::domain::models::{Permission, Session};
use crate::gateway::wire::RpcError;

pub type HandlerResult = Result<Value, RpcError>;
pub type HandlerFn =
    Arc<dyn Fn(Option<Value>, Session) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

struct Route {
    required_permissions: BTreeSet<Permission>,
    handler: HandlerFn,
}

/// Method table with per-route permission requirements.
#[derive(Default)]
pub struct RpcRouter {
    routes: HashMap<String, Route>,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Later registrations replace earlier ones.
    pub fn register<F, Fut>(
        &mut self,
        method: impl Into<String>,
        required_permissions: impl IntoIterator<Item = Permission>,
        handler: F,
    ) where
        F: Fn(Option<Value>, Session) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |params, session| Box::pin(handler(params, session)));
        self.routes.insert(
            method.into(),
            Route {
                required_permissions: required_permissions.into_iter().collect(),
                handler,
            },
        );
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.routes.keys().cloned().collect();
        methods.push("system.methods".to_string());
        methods.sort();
        methods.dedup();
        methods
    }

    /// Route one request for an authenticated session.
    pub async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        session: &Session,
    ) -> HandlerResult {
        // Reserved introspection method, read permission.
        if method == "system.methods" {
            if !session.has_permission(Permission::Read) {
                return Err(RpcError::unauthorized());
            }
            return Ok(serde_json::json!({ "methods": self.methods() }));
        }

        let Some(route) = self.routes.get(method) else {
            debug!(method, "unknown method");
            return Err(RpcError::method_not_found(method));
        };

        for permission in &route.required_permissions {
            if !session.has_permission(*permission) {
                return Err(RpcError::unauthorized());
            }
        }

        (route.handler)(params, session.clone()).await
    }
}

/// Decode params into a typed record; absent params decode as `{}`.
pub fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or_else(|| serde_json::json!({})))
        .map_err(|e| RpcError::invalid_params(e.to_string()))
}
