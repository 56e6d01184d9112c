/// Background tool jobs
///
/// A `ToolJob` records one asynchronous tool invocation. The submitting
/// caller gets the job id back immediately; the persisted record is the
/// only channel through which completion is observed (poll-based).
use crate::registry::ConnectionRegistry;
use crate::{McpError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// One recorded tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolJob {
    /// Assigned by the job store on create
    pub id: u64,
    pub server_id: String,
    pub tool_name: String,
    pub arguments_json: String,
    pub status: JobStatus,
    pub result_json: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the terminal transition
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolJob {
    pub fn new(
        server_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments_json: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            server_id: server_id.into(),
            tool_name: tool_name.into(),
            arguments_json: arguments_json.into(),
            status: JobStatus::Pending,
            result_json: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Persistence seam for job records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job and assign its id.
    async fn create(&self, job: ToolJob) -> Result<ToolJob>;
    async fn get(&self, id: u64) -> Result<Option<ToolJob>>;
    async fn find_by_server(&self, server_id: &str) -> Result<Vec<ToolJob>>;
    async fn update(&self, job: &ToolJob) -> Result<()>;
}

/// Executes tool jobs against the registry on background tasks.
pub struct ToolJobRunner {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn JobStore>,
}

impl ToolJobRunner {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn JobStore>) -> Self {
        Self { registry, store }
    }

    /// Create a pending job and start executing it in the background.
    /// Returns the job id; callers observe completion by polling the store.
    pub async fn submit(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments_json: &str,
    ) -> Result<u64> {
        let job = self
            .store
            .create(ToolJob::new(server_id, tool_name, arguments_json))
            .await?;
        let job_id = job.id;

        info!(
            target: "tool_jobs",
            job = job_id,
            server = %job.server_id,
            tool = %job.tool_name,
            "submitting tool job"
        );

        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            Self::execute(registry, store, job).await;
        });

        Ok(job_id)
    }

    async fn execute(registry: Arc<ConnectionRegistry>, store: Arc<dyn JobStore>, mut job: ToolJob) {
        job.status = JobStatus::Running;
        if let Err(e) = store.update(&job).await {
            error!(
                target: "tool_jobs",
                job = job.id,
                error = %e,
                "failed to persist running transition"
            );
        }

        match Self::invoke(&registry, &job).await {
            Ok(result) => {
                job.result_json = Some(result.to_string());
                job.status = JobStatus::Success;
            }
            Err(e) => {
                warn!(
                    target: "tool_jobs",
                    job = job.id,
                    server = %job.server_id,
                    error = %e,
                    "tool job failed"
                );
                let payload =
                    serde_json::json!({"error": {"code": e.code(), "message": e.to_string()}});
                job.result_json = Some(payload.to_string());
                job.status = JobStatus::Failed;
            }
        }

        job.completed_at = Some(Utc::now());
        if let Err(e) = store.update(&job).await {
            error!(
                target: "tool_jobs",
                job = job.id,
                error = %e,
                "failed to persist job outcome"
            );
        }

        debug!(target: "tool_jobs", job = job.id, status = ?job.status, "tool job finished");
    }

    async fn invoke(registry: &ConnectionRegistry, job: &ToolJob) -> Result<Value> {
        let arguments = if job.arguments_json.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(&job.arguments_json)
                    .map_err(|e| McpError::Config(format!("invalid job arguments: {e}")))?,
            )
        };
        registry.call_tool(&job.server_id, &job.tool_name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientSettings;
    use crate::store::InMemoryCatalog;
    use mockall::Sequence;

    fn empty_registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(
            ClientSettings::default(),
            Arc::new(InMemoryCatalog::new()),
        ))
    }

    #[test]
    fn new_job_is_pending_without_completion() {
        let job = ToolJob::new("echo", "ping", "{}");
        assert_eq!(job.id, 0);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result_json.is_none());
        assert!(job.completed_at.is_none());
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[tokio::test]
    async fn submit_propagates_store_failure() {
        let mut store = MockJobStore::new();
        store
            .expect_create()
            .returning(|_| Err(McpError::Config("store down".to_string())));

        let runner = ToolJobRunner::new(empty_registry(), Arc::new(store));
        let err = runner.submit("echo", "ping", "{}").await.unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
    }

    #[tokio::test]
    async fn execute_records_running_then_terminal_outcome() {
        let mut store = MockJobStore::new();
        let mut seq = Sequence::new();
        store
            .expect_update()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|job| job.status == JobStatus::Running && job.completed_at.is_none())
            .returning(|_| Ok(()));
        store
            .expect_update()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|job| {
                job.status == JobStatus::Failed
                    && job.completed_at.is_some()
                    && job
                        .result_json
                        .as_deref()
                        .is_some_and(|payload| payload.contains("NOT_FOUND"))
            })
            .returning(|_| Ok(()));

        let mut job = ToolJob::new("ghost", "ping", "{}");
        job.id = 1;

        ToolJobRunner::execute(empty_registry(), Arc::new(store), job).await;
    }

    #[tokio::test]
    async fn execute_fails_job_on_malformed_arguments() {
        let mut store = MockJobStore::new();
        store.expect_update().times(2).returning(|_| Ok(()));

        let registry = empty_registry();
        let mut job = ToolJob::new("echo", "ping", "not json");
        job.id = 7;

        // the registry is never reached; argument parsing fails first
        ToolJobRunner::execute(registry, Arc::new(store), job).await;
    }
}
