//! Connection registry: the single source of truth for who is online.
//!
//! Both maps live behind one lock so that registration, removal and roster
//! reads are linearizable. A roster read never observes a connection that is
//! half removed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::auth::Identity;
use crate::error::RegistryError;
use crate::ws::connection::Connection;
use crate::ws::ConnectionId;

/// One roster entry. A user appears once no matter how many tabs they hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub username: String,
}

impl From<&Identity> for PresenceEntry {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    by_user: HashMap<String, Vec<ConnectionId>>,
}

impl Inner {
    fn roster(&self) -> Vec<PresenceEntry> {
        let mut roster: Vec<PresenceEntry> = self
            .by_user
            .values()
            .filter_map(|ids| ids.first())
            .filter_map(|id| self.connections.get(id))
            .filter_map(|conn| conn.identity())
            .map(PresenceEntry::from)
            .collect();
        roster.sort_by(|a, b| {
            a.username
                .cmp(&b.username)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        roster
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new connection. A connection that already carries an identity
    /// is indexed under it immediately.
    pub fn register(&self, conn: Arc<Connection>) {
        let mut inner = self.inner.write();
        if let Some(identity) = conn.identity() {
            inner
                .by_user
                .entry(identity.user_id.clone())
                .or_default()
                .push(conn.id());
        }
        let id = conn.id();
        inner.connections.insert(id, conn);

        tracing::debug!(
            conn_id = id,
            connections = inner.connections.len(),
            "Connection registered"
        );
    }

    /// Remove a connection. Absent ids are a no-op returning `None`.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.inner.write();
        let conn = inner.connections.remove(&id)?;

        if let Some(user_id) = conn.user_id() {
            let mut now_empty = false;
            if let Some(ids) = inner.by_user.get_mut(user_id) {
                ids.retain(|c| *c != id);
                now_empty = ids.is_empty();
            }
            if now_empty {
                inner.by_user.remove(user_id);
            }
        }

        tracing::debug!(
            conn_id = id,
            connections = inner.connections.len(),
            "Connection unregistered"
        );
        Some(conn)
    }

    /// Bind `identity` to a registered connection and index it by user.
    pub fn set_identity(&self, id: ConnectionId, identity: Identity) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let conn = inner
            .connections
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownConnection(id))?;

        let user_id = identity.user_id.clone();
        if !conn.bind_identity(identity) {
            return Err(RegistryError::IdentityAlreadyBound(id));
        }
        inner.by_user.entry(user_id).or_default().push(id);
        Ok(())
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.inner.read().connections.get(&id).cloned()
    }

    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.inner.read().connections.values().cloned().collect()
    }

    /// Every live connection owned by `user_id` (zero, one, or several tabs).
    pub fn connections_for(&self, user_id: &str) -> Vec<Arc<Connection>> {
        let inner = self.inner.read();
        inner
            .by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Users with at least one identity-resolved connection, sorted by
    /// username then user id.
    pub fn online_roster(&self) -> Vec<PresenceEntry> {
        self.inner.read().roster()
    }

    /// Roster plus every connection to send it to, read under one lock.
    pub fn snapshot(&self) -> (Vec<PresenceEntry>, Vec<Arc<Connection>>) {
        let inner = self.inner.read();
        (inner.roster(), inner.connections.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
