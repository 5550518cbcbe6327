//! Per-port path table
//!
//! Ordered list of path-scoped stream servers behind one front door. The
//! table is shared between the registry (writer) and the front door's
//! interceptor (reader).

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::server::StreamServer;

use super::error::RegistryError;
use super::path::normalize_path;

/// One registered path
#[derive(Debug, Clone)]
pub struct Route {
    /// Normalized path
    pub path: String,
    pub server: StreamServer,
}

/// Shared, ordered path table
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    routes: Arc<RwLock<Vec<Route>>>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route
    ///
    /// Returns the normalized path. A path that is already present is
    /// rejected.
    pub async fn insert(
        &self,
        port: u16,
        path: &str,
        server: StreamServer,
    ) -> Result<String, RegistryError> {
        let path = normalize_path(path);
        let mut routes = self.routes.write().await;

        if routes.iter().any(|r| r.path == path) {
            return Err(RegistryError::DuplicatePath { port, path });
        }

        routes.push(Route {
            path: path.clone(),
            server,
        });
        Ok(path)
    }

    /// Remove the route for `path`, returning its server
    pub async fn remove(&self, path: &str) -> Option<StreamServer> {
        let path = normalize_path(path);
        let mut routes = self.routes.write().await;

        let index = routes.iter().position(|r| r.path == path)?;
        Some(routes.remove(index).server)
    }

    /// First server registered under the normalized `path`
    pub async fn lookup(&self, path: &str) -> Option<StreamServer> {
        let path = normalize_path(path);
        self.routes
            .read()
            .await
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.server.clone())
    }

    /// Registered paths in registration order
    pub async fn paths(&self) -> Vec<String> {
        self.routes
            .read()
            .await
            .iter()
            .map(|r| r.path.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    /// Take every route out of the table
    pub async fn drain(&self) -> Vec<Route> {
        std::mem::take(&mut *self.routes.write().await)
    }
}
