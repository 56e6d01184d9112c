// Tether Core Library
// MCP connection supervision runtime

pub mod config;
pub mod connection;
pub mod job;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod telemetry;

// Export core types
pub use config::{load_servers_file, ClientSettings, ConnectionConfig, ConnectionState};
pub use connection::ServerConnection;
pub use job::{JobStatus, JobStore, ToolJob, ToolJobRunner};
pub use protocol::{McpResource, McpTool, PROTOCOL_VERSION};
pub use registry::{ConnectionRegistry, ServerStatus};
pub use store::{CatalogSink, InMemoryCatalog, InMemoryJobStore, InMemoryServerStore, ServerStore};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection error on `{server}`: {reason}")]
    Connection { server: String, reason: String },

    #[error("protocol error on `{server}`: {reason}")]
    Protocol { server: String, reason: String },

    #[error("tool error on `{server}`: {message}")]
    Tool { server: String, message: String },

    #[error("resource error on `{server}`: {message}")]
    Resource { server: String, message: String },

    #[error("server not found: {0}")]
    NotFound(String),

    #[error("server not connected: {0}")]
    NotConnected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Convert to error code string
    pub fn code(&self) -> &'static str {
        match self {
            McpError::Config(_) => "CONFIG_ERROR",
            McpError::Connection { .. } => "CONNECTION_ERROR",
            McpError::Protocol { .. } => "PROTOCOL_ERROR",
            McpError::Tool { .. } => "TOOL_ERROR",
            McpError::Resource { .. } => "RESOURCE_ERROR",
            McpError::NotFound(_) => "NOT_FOUND",
            McpError::NotConnected(_) => "NOT_CONNECTED",
            McpError::Io(_) => "IO_ERROR",
            McpError::Json(_) => "JSON_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, McpError>;
