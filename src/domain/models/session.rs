//! Gateway session model.
//!
//! A session is the lifetime of one authenticated connection. Pending
//! connections have no session; a session is created at promotion time and
//! destroyed on disconnect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Capabilities granted to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// The full permission set granted to loopback connections.
    pub fn all() -> BTreeSet<Permission> {
        [Self::Read, Self::Write, Self::Admin].into_iter().collect()
    }
}

/// A broadcast filter registered by a session.
///
/// An event matches when the goal filter is absent or equal to the event's
/// goal id, and when the types filter is absent or some entry is a prefix of
/// the event type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub goal_id: Option<Uuid>,
    pub types: Option<Vec<String>>,
}

impl Subscription {
    /// Match an event against this filter.
    pub fn matches(&self, event_type: &str, goal_id: Option<Uuid>) -> bool {
        if let Some(want) = self.goal_id {
            if goal_id != Some(want) {
                return false;
            }
        }
        match &self.types {
            None => true,
            Some(prefixes) => prefixes.iter().any(|p| event_type.starts_with(p.as_str())),
        }
    }
}

/// One authenticated connection's identity and filter state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session id: a token-derived uuid, or `local:<addr>` for loopback.
    pub id: String,
    /// Client public key, or `local:<addr>` for loopback sessions.
    pub public_key: String,
    /// Granted permissions.
    pub permissions: BTreeSet<Permission>,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Active broadcast filter; `None` means not subscribed.
    pub subscription: Option<Subscription>,
}

impl Session {
    pub fn new(id: impl Into<String>, public_key: impl Into<String>, permissions: BTreeSet<Permission>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            public_key: public_key.into(),
            permissions,
            connected_at: now,
            last_activity_at: now,
            subscription: None,
        }
    }

    /// A loopback session with full permissions.
    pub fn local(addr: impl std::fmt::Display) -> Self {
        let id = format!("local:{addr}");
        Self::new(id.clone(), id, Permission::all())
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}
