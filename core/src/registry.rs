/// Connection registry
///
/// Concurrency-safe mapping from server id to live `ServerConnection`.
/// Orchestrates register/unregister/restore/refresh across all connections;
/// registered connections are shared between foreground callers and
/// background jobs.
use crate::config::{ClientSettings, ConnectionConfig, ConnectionState};
use crate::connection::ServerConnection;
use crate::protocol::{McpResource, McpTool};
use crate::store::{CatalogSink, ServerStore};
use crate::{McpError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Snapshot of one registry entry; `connected` is recomputed live, never
/// cached.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub connected: bool,
    pub config: ConnectionConfig,
}

/// Registry of MCP server connections.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ServerConnection>>,
    settings: ClientSettings,
    catalog: Arc<dyn CatalogSink>,
}

impl ConnectionRegistry {
    pub fn new(settings: ClientSettings, catalog: Arc<dyn CatalogSink>) -> Self {
        Self {
            connections: DashMap::new(),
            settings,
            catalog,
        }
    }

    /// Register a server and connect to it synchronously.
    ///
    /// The connection is inserted only after a successful handshake; on
    /// failure no entry is added and the spawned process is released. Two
    /// concurrent registrations for one id cannot both succeed.
    pub async fn register(&self, config: ConnectionConfig) -> Result<()> {
        config.validate()?;
        let id = config.id.clone();

        if self.connections.contains_key(&id) {
            warn!(target: "mcp_registry", server = %id, "server already registered");
            return Err(McpError::Config(format!("server `{id}` is already registered")));
        }

        info!(target: "mcp_registry", server = %id, "registering MCP server");

        let connection = Arc::new(ServerConnection::new(config));
        connection
            .connect(&self.settings.name, &self.settings.version)
            .await?;

        let lost_race = match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => true,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&connection));
                false
            }
        };
        if lost_race {
            connection.disconnect().await;
            return Err(McpError::Config(format!("server `{id}` is already registered")));
        }

        info!(target: "mcp_registry", server = %id, "MCP server registered");
        Ok(())
    }

    /// Remove and disconnect a server; no-op for unknown ids.
    pub async fn unregister(&self, id: &str) {
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.disconnect().await;
            info!(target: "mcp_registry", server = %id, "MCP server unregistered");
        }
    }

    /// Snapshot of every registered server with live connectivity.
    pub async fn list(&self) -> Vec<ServerStatus> {
        let snapshot = self.snapshot();
        let mut statuses = Vec::with_capacity(snapshot.len());
        for connection in snapshot {
            statuses.push(ServerStatus {
                id: connection.id().to_string(),
                connected: connection.is_connected().await,
                config: connection.config().clone(),
            });
        }
        statuses
    }

    /// True iff the server is registered and its process is alive.
    pub async fn is_connected(&self, id: &str) -> bool {
        match self.get(id) {
            Some(connection) => connection.is_connected().await,
            None => false,
        }
    }

    /// List tools from one server and replace its catalog entry.
    pub async fn list_tools(&self, id: &str) -> Result<Vec<McpTool>> {
        let connection = self.connection(id).await?;
        let tools = connection.list_tools().await?;
        self.catalog.replace_tools(id, &tools).await?;
        Ok(tools)
    }

    /// List resources from one server and replace its catalog entry.
    pub async fn list_resources(&self, id: &str) -> Result<Vec<McpResource>> {
        let connection = self.connection(id).await?;
        let resources = connection.list_resources().await?;
        self.catalog.replace_resources(id, &resources).await?;
        Ok(resources)
    }

    /// List tools from every server. A failing server contributes an empty
    /// entry and never blocks the others.
    pub async fn list_all_tools(&self) -> HashMap<String, Vec<McpTool>> {
        let mut all_tools = HashMap::new();
        for connection in self.snapshot() {
            let id = connection.id().to_string();
            match connection.list_tools().await {
                Ok(tools) => {
                    all_tools.insert(id, tools);
                }
                Err(e) => {
                    error!(target: "mcp_registry", server = %id, error = %e, "error listing tools");
                    all_tools.insert(id, Vec::new());
                }
            }
        }
        all_tools
    }

    /// List resources from every server, partial-failure tolerant.
    pub async fn list_all_resources(&self) -> HashMap<String, Vec<McpResource>> {
        let mut all_resources = HashMap::new();
        for connection in self.snapshot() {
            let id = connection.id().to_string();
            match connection.list_resources().await {
                Ok(resources) => {
                    all_resources.insert(id, resources);
                }
                Err(e) => {
                    error!(target: "mcp_registry", server = %id, error = %e, "error listing resources");
                    all_resources.insert(id, Vec::new());
                }
            }
        }
        all_resources
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(&self, id: &str, tool: &str, arguments: Option<Value>) -> Result<Value> {
        let connection = self.connection(id).await?;
        connection.call_tool(tool, arguments).await
    }

    /// Reconnect every persisted server. A failed entry is marked `Failed`
    /// in the store and logged; the rest of the batch continues.
    pub async fn restore_from_persisted(&self, store: &dyn ServerStore) {
        let entries = store.load_all().await;
        info!(target: "mcp_registry", count = entries.len(), "restoring persisted MCP servers");

        for config in entries {
            let id = config.id.clone();
            match self.register(config).await {
                Ok(()) => {
                    store.mark_status(&id, ConnectionState::Connected).await;
                    info!(target: "mcp_registry", server = %id, "restored server");
                }
                Err(e) => {
                    warn!(target: "mcp_registry", server = %id, error = %e, "failed to restore server");
                    store.mark_status(&id, ConnectionState::Failed).await;
                }
            }
        }
    }

    /// Re-fetch tools and resources for every connected server, recording
    /// per-server failures without aborting the sweep.
    pub async fn refresh_all(&self) {
        let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if !self.is_connected(&id).await {
                continue;
            }
            if let Err(e) = self.list_tools(&id).await {
                warn!(target: "mcp_registry", server = %id, error = %e, "tool refresh failed");
            }
            if let Err(e) = self.list_resources(&id).await {
                warn!(target: "mcp_registry", server = %id, error = %e, "resource refresh failed");
            }
        }
    }

    /// Disconnect every server and clear the registry.
    pub async fn shutdown(&self) {
        info!(target: "mcp_registry", "shutting down, disconnecting all servers");

        let entries: Vec<(String, Arc<ServerConnection>)> = self
            .connections
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        self.connections.clear();

        for (id, connection) in entries {
            debug!(target: "mcp_registry", server = %id, "disconnecting server");
            connection.disconnect().await;
        }

        info!(target: "mcp_registry", "registry shutdown complete");
    }

    fn get(&self, id: &str) -> Option<Arc<ServerConnection>> {
        self.connections.get(id).map(|e| Arc::clone(e.value()))
    }

    // Snapshot before awaiting anything; map shards must never be held
    // across a suspension point.
    fn snapshot(&self) -> Vec<Arc<ServerConnection>> {
        self.connections
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    async fn connection(&self, id: &str) -> Result<Arc<ServerConnection>> {
        let connection = self
            .get(id)
            .ok_or_else(|| McpError::NotFound(id.to_string()))?;
        if !connection.is_connected().await {
            return Err(McpError::NotConnected(id.to_string()));
        }
        Ok(connection)
    }
}
