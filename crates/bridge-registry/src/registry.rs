//! Connection registry
//!
//! The only state shared between providers. Every operation is a short
//! critical section on a sharded map, so concurrent register, deregister and
//! lookup from many connection tasks never observe a torn table.

use crate::connection::ClientConnection;
use crate::error::RegistryError;
use bridge_protocol::{ConnectionId, ConnectionRole};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Capacity used by [`ConnectionRegistry::init`] callers that have no limit of their own
pub const DEFAULT_CAPACITY: usize = 1024;

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registrations accepted since `init` (or the last `reset`)
    pub total_registered: usize,
    /// Currently registered connections
    pub active: usize,
    /// Currently registered connections per role
    pub by_role: HashMap<ConnectionRole, usize>,
}

/// Table of active connections
#[derive(Debug)]
pub struct ConnectionRegistry {
    capacity: usize,
    connections: DashMap<ConnectionId, ClientConnection>,
    /// Slots reserved against `capacity`
    active: AtomicUsize,
    shut_down: AtomicBool,
    total_registered: AtomicUsize,
}

impl ConnectionRegistry {
    /// Construct the registry for this process
    #[must_use]
    pub fn init(capacity: usize) -> Arc<Self> {
        tracing::debug!(capacity, "connection registry initialized");
        Arc::new(Self {
            capacity,
            connections: DashMap::new(),
            active: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
            total_registered: AtomicUsize::new(0),
        })
    }

    /// Add a connection
    ///
    /// Re-registering an id replaces the previous entry.
    ///
    /// # Errors
    /// - `RegistryError::ShutDown` after [`ConnectionRegistry::shutdown`]
    /// - `RegistryError::CapacityExhausted` if the table is full
    pub fn register(&self, connection: ClientConnection) -> Result<ConnectionId, RegistryError> {
        if self.is_shut_down() {
            return Err(RegistryError::ShutDown);
        }

        let id = connection.id.clone();
        if let Some(mut existing) = self.connections.get_mut(&id) {
            *existing = connection;
            drop(existing);
            self.total_registered.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection_id = %id, "connection re-registered");
            return Ok(id);
        }

        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map_err(|_| RegistryError::CapacityExhausted(self.capacity))?;
        if self.connections.insert(id.clone(), connection).is_some() {
            // A concurrent registration of the same id got there first.
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
        self.total_registered.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(connection_id = %id, "connection registered");
        Ok(id)
    }

    /// Remove a connection
    ///
    /// # Errors
    /// Returns `RegistryError::NotFound` if no such connection is registered
    pub fn deregister(&self, id: &ConnectionId) -> Result<ClientConnection, RegistryError> {
        let (_, connection) = self
            .connections
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        self.active.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(connection_id = %id, role = %connection.role, "connection deregistered");
        Ok(connection)
    }

    /// Look up a connection by id
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<ClientConnection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Every connection with `role`
    #[must_use]
    pub fn find_by_role(&self, role: ConnectionRole) -> Vec<ClientConnection> {
        self.collect(|c| c.role == role)
    }

    /// Every connection owned by `owner_id`
    #[must_use]
    pub fn find_by_owner(&self, owner_id: &str) -> Vec<ClientConnection> {
        self.collect(|c| c.is_owned_by(owner_id))
    }

    /// Every connection with `role` owned by `owner_id`
    #[must_use]
    pub fn find_by_role_and_owner(&self, role: ConnectionRole, owner_id: &str) -> Vec<ClientConnection> {
        self.collect(|c| c.role == role && c.is_owned_by(owner_id))
    }

    /// Drop entries whose peer has hung up; returns how many were removed
    pub fn prune_closed(&self) -> usize {
        let mut removed = 0;
        self.connections.retain(|_, c| {
            let open = c.is_open();
            if !open {
                removed += 1;
            }
            open
        });
        self.active.fetch_sub(removed, Ordering::AcqRel);
        if removed > 0 {
            tracing::debug!(removed, "pruned closed connections");
        }
        removed
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut by_role = HashMap::new();
        for entry in &self.connections {
            *by_role.entry(entry.value().role).or_insert(0) += 1;
        }
        RegistryStats {
            total_registered: self.total_registered.load(Ordering::Relaxed),
            active: self.connections.len(),
            by_role,
        }
    }

    /// Number of registered connections
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Check if the registry refuses new registrations
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Drop every connection and refuse further registrations
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        let dropped = self.connections.len();
        self.connections.clear();
        self.active.store(0, Ordering::Release);
        tracing::info!(dropped, "connection registry shut down");
    }

    /// Clear the table and counters and accept registrations again
    pub fn reset(&self) {
        self.connections.clear();
        self.active.store(0, Ordering::Release);
        self.total_registered.store(0, Ordering::Relaxed);
        self.shut_down.store(false, Ordering::Release);
    }

    fn collect(&self, predicate: impl Fn(&ClientConnection) -> bool) -> Vec<ClientConnection> {
        self.connections
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}
