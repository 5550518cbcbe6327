//! Registry implementation
//!
//! Per port: the shared front door (if any) and the path table behind it.

use std::collections::HashMap;
use std::net::SocketAddr;

use futures_util::future::join_all;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::server::{FrontDoor, FrontDoorSource, StreamServer};

use super::config::RegistryConfig;
use super::table::PathTable;

#[derive(Default)]
struct PortEntry {
    front_door: Option<FrontDoor>,
    table: PathTable,
}

/// Registry of front doors and path-scoped stream servers
///
/// All mutations are serialized behind one async mutex. Each port's path
/// table is shared with that port's front door, so upgrades are routed
/// without taking the registry lock.
pub struct Registry {
    ports: Mutex<HashMap<u16, PortEntry>>,

    /// Configuration
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            ports: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Return the front door of `port`, creating it from `source` if missing
    ///
    /// Returns the listening address for managed front doors. If a front door
    /// already exists, `source` is ignored.
    pub async fn ensure_front_door(
        &self,
        port: u16,
        source: FrontDoorSource,
    ) -> Result<Option<SocketAddr>> {
        let mut ports = self.ports.lock().await;
        let entry = ports.entry(port).or_default();

        if let Some(ref front_door) = entry.front_door {
            return Ok(front_door.local_addr());
        }

        match FrontDoor::start(port, source, entry.table.clone(), &self.config).await {
            Ok(front_door) => {
                let addr = front_door.local_addr();
                entry.front_door = Some(front_door);
                Ok(addr)
            }
            Err(e) => {
                if entry.table.is_empty().await {
                    ports.remove(&port);
                }
                Err(e)
            }
        }
    }

    /// Register `server` under the normalized `path` on `port`
    ///
    /// Returns the normalized path.
    pub async fn register_path(
        &self,
        port: u16,
        path: &str,
        server: StreamServer,
    ) -> Result<String> {
        let mut ports = self.ports.lock().await;
        let entry = ports.entry(port).or_default();

        let path = entry.table.insert(port, path, server).await?;
        tracing::info!(port = port, path = %path, "Path registered");
        Ok(path)
    }

    /// Remove the server registered under `path` on `port`
    ///
    /// The front door stays up even when the table becomes empty.
    pub async fn unregister_path(&self, port: u16, path: &str) -> Option<StreamServer> {
        let ports = self.ports.lock().await;
        let server = ports.get(&port)?.table.remove(path).await?;

        tracing::info!(port = port, path = %path, "Path unregistered");
        Some(server)
    }

    /// Server an upgrade for `path` on `port` would be routed to
    pub async fn route(&self, port: u16, path: &str) -> Option<StreamServer> {
        let table = self.ports.lock().await.get(&port)?.table.clone();
        table.lookup(path).await
    }

    /// Listening address of the managed front door on `port`
    pub async fn front_door_addr(&self, port: u16) -> Option<SocketAddr> {
        self.ports
            .lock()
            .await
            .get(&port)
            .and_then(|e| e.front_door.as_ref())
            .and_then(FrontDoor::local_addr)
    }

    pub async fn has_front_door(&self, port: u16) -> bool {
        self.ports
            .lock()
            .await
            .get(&port)
            .map(|e| e.front_door.is_some())
            .unwrap_or(false)
    }

    /// Registered paths on `port` in registration order
    pub async fn paths(&self, port: u16) -> Vec<String> {
        let table = match self.ports.lock().await.get(&port) {
            Some(entry) => entry.table.clone(),
            None => return Vec::new(),
        };
        table.paths().await
    }

    /// Number of ports with a front door or registered paths
    pub async fn port_count(&self) -> usize {
        self.ports.lock().await.len()
    }

    /// Close the front door of `port` and every server behind it
    ///
    /// Returns false if nothing was registered on the port.
    pub async fn teardown(&self, port: u16) -> Result<bool> {
        let entry = match self.ports.lock().await.remove(&port) {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let result = match entry.front_door {
            Some(front_door) => front_door.close(self.config.close_timeout).await,
            None => Ok(()),
        };
        self.close_servers(port, &entry.table).await;

        tracing::info!(port = port, "Port torn down");
        result.map(|_| true)
    }

    /// Close every front door and path-scoped server, then clear the registry
    ///
    /// Returns the number of managed front doors closed. A second call finds
    /// nothing and returns 0.
    pub async fn dispose_all(&self) -> usize {
        let entries: Vec<(u16, PortEntry)> = self.ports.lock().await.drain().collect();
        if entries.is_empty() {
            return 0;
        }

        let mut tables = Vec::with_capacity(entries.len());
        let mut closes = Vec::new();
        for (port, entry) in entries {
            if let Some(front_door) = entry.front_door {
                let managed = front_door.is_managed();
                let timeout = self.config.close_timeout;
                closes.push(async move {
                    if let Err(e) = front_door.close(timeout).await {
                        tracing::warn!(port = port, error = %e, "Front door disposal incomplete");
                    }
                    managed
                });
            }
            tables.push((port, entry.table));
        }

        let closed = join_all(closes).await.into_iter().filter(|m| *m).count();

        for (port, table) in &tables {
            self.close_servers(*port, table).await;
        }

        tracing::info!(front_doors = closed, ports = tables.len(), "Registry disposed");
        closed
    }

    async fn close_servers(&self, port: u16, table: &PathTable) {
        for route in table.drain().await {
            if tokio::time::timeout(self.config.close_timeout, route.server.close())
                .await
                .is_err()
            {
                tracing::warn!(port = port, path = %route.path, "Stream server close timed out");
            }
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
