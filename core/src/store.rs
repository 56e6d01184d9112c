/// Collaborator store seams
///
/// The core does not persist anything itself: discovered catalogs, server
/// records, and job history belong to the host. These traits are the seams
/// the host plugs its storage into; the in-memory implementations below
/// serve embedders that need nothing durable, and the test suite.
use crate::config::{ConnectionConfig, ConnectionState};
use crate::job::{JobStore, ToolJob};
use crate::protocol::{McpResource, McpTool};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Replace-all sink for discovered tool/resource catalogs.
#[async_trait]
pub trait CatalogSink: Send + Sync {
    async fn replace_tools(&self, server_id: &str, tools: &[McpTool]) -> Result<()>;
    async fn replace_resources(&self, server_id: &str, resources: &[McpResource]) -> Result<()>;
}

/// Source of persisted server configs, and sink for their restore outcomes.
#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn load_all(&self) -> Vec<ConnectionConfig>;
    async fn mark_status(&self, server_id: &str, status: ConnectionState);
}

/// In-memory catalog keyed by server id.
#[derive(Default)]
pub struct InMemoryCatalog {
    tools: DashMap<String, Vec<McpTool>>,
    resources: DashMap<String, Vec<McpResource>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tools_for(&self, server_id: &str) -> Option<Vec<McpTool>> {
        self.tools.get(server_id).map(|entry| entry.clone())
    }

    pub fn resources_for(&self, server_id: &str) -> Option<Vec<McpResource>> {
        self.resources.get(server_id).map(|entry| entry.clone())
    }
}

#[async_trait]
impl CatalogSink for InMemoryCatalog {
    async fn replace_tools(&self, server_id: &str, tools: &[McpTool]) -> Result<()> {
        self.tools.insert(server_id.to_string(), tools.to_vec());
        Ok(())
    }

    async fn replace_resources(&self, server_id: &str, resources: &[McpResource]) -> Result<()> {
        self.resources
            .insert(server_id.to_string(), resources.to_vec());
        Ok(())
    }
}

/// In-memory server store seeded with a fixed config list.
pub struct InMemoryServerStore {
    configs: Vec<ConnectionConfig>,
    statuses: DashMap<String, ConnectionState>,
}

impl InMemoryServerStore {
    pub fn new(configs: Vec<ConnectionConfig>) -> Self {
        Self {
            configs,
            statuses: DashMap::new(),
        }
    }

    pub fn status_of(&self, server_id: &str) -> Option<ConnectionState> {
        self.statuses.get(server_id).map(|entry| *entry)
    }
}

#[async_trait]
impl ServerStore for InMemoryServerStore {
    async fn load_all(&self) -> Vec<ConnectionConfig> {
        self.configs.clone()
    }

    async fn mark_status(&self, server_id: &str, status: ConnectionState) {
        self.statuses.insert(server_id.to_string(), status);
    }
}

/// In-memory job store with sequential id assignment.
pub struct InMemoryJobStore {
    jobs: DashMap<u64, ToolJob>,
    next_id: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, mut job: ToolJob) -> Result<ToolJob> {
        job.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: u64) -> Result<Option<ToolJob>> {
        Ok(self.jobs.get(&id).map(|entry| entry.clone()))
    }

    async fn find_by_server(&self, server_id: &str) -> Result<Vec<ToolJob>> {
        Ok(self
            .jobs
            .iter()
            .filter(|entry| entry.server_id == server_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn update(&self, job: &ToolJob) -> Result<()> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }
}
