//! This module contains the [Pool] struct.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::connection_ref::ConnectionRef;
use crate::core::transport::ConnectionInterface;
use crate::error::Error;
use crate::error::Result;

/// [Pool] manages all the connections for each peer.
pub struct Pool<C> {
    connections: DashMap<String, Arc<C>>,
    endpoints: DashMap<String, String>,
}

impl<C> Default for Pool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Pool<C> {
    /// Create a new [Pool] instance.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            endpoints: DashMap::new(),
        }
    }

    /// Get a reference of the connection by its id.
    pub fn connection(&self, cid: &str) -> Result<ConnectionRef<C>> {
        self.connections
            .get(cid)
            .map(|c| ConnectionRef::new(cid, c.value()))
            .ok_or(Error::ConnectionNotFound(cid.to_string()))
    }

    /// Get all the connections in the pool.
    pub fn connections(&self) -> Vec<(String, ConnectionRef<C>)> {
        self.connections
            .iter()
            .map(|kv| (kv.key().clone(), ConnectionRef::new(kv.key(), kv.value())))
            .collect()
    }

    /// Get all the connection ids in the pool.
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|kv| kv.key().clone()).collect()
    }

    /// Endpoint announced by the remote side of a connection during handshake.
    pub fn remote_endpoint(&self, cid: &str) -> Option<String> {
        self.endpoints.get(cid).map(|e| e.value().clone())
    }
}

impl<C> Pool<C>
where C: ConnectionInterface<Error = Error> + Send + Sync
{
    /// The `safely_insert` method is used to insert a connection into the pool.
    /// It ensures that the connection is not inserted twice in concurrent scenarios.
    ///
    /// An existing connection is only replaced when it is no longer usable.
    pub fn safely_insert(&self, cid: &str, endpoint: &str, conn: C) -> Result<()> {
        let Some(entry) = self.connections.try_entry(cid.to_string()) else {
            return Err(Error::ConnectionAlreadyExists(cid.to_string()));
        };

        match entry {
            Entry::Occupied(mut entry) => {
                if !entry.get().connection_state().is_unavailable() {
                    return Err(Error::ConnectionAlreadyExists(cid.to_string()));
                }
                entry.insert(Arc::new(conn));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(conn));
            }
        };
        self.endpoints.insert(cid.to_string(), endpoint.to_string());

        Ok(())
    }

    /// Release the connection from pool without closing it.
    /// Used when the remote side has already gone.
    pub fn release(&self, cid: &str) -> Option<Arc<C>> {
        self.connections.remove(cid).map(|(_, conn)| conn)
    }

    /// This method closes and releases the connection from pool.
    /// All references to this cid, created by `connection`, will be released.
    /// The [ConnectionInterface] methods of them will return [Error::ConnectionReleased].
    pub async fn safely_remove(&self, cid: &str) -> Result<()> {
        let Some((_, conn)) = self.connections.remove(cid) else {
            return Err(Error::ConnectionNotFound(cid.to_string()));
        };
        conn.close().await
    }
}
