/// Server connection configuration
///
/// A `ConnectionConfig` describes how to launch one MCP server process.
/// Configs are immutable once constructed; changing a server's launch
/// command means unregistering and re-registering it.
use crate::{McpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Description of one MCP server child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Unique server identifier
    pub id: String,
    /// Command to execute (e.g., "node", "python")
    pub command: String,
    /// Arguments to pass to command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

impl ConnectionConfig {
    /// Validate the config before it is used to spawn anything.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(McpError::Config("server id must not be empty".to_string()));
        }
        if self.command.trim().is_empty() {
            return Err(McpError::Config(format!(
                "server `{}` has no launch command",
                self.id
            )));
        }
        Ok(())
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Identity presented to servers during the initialize handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    pub name: String,
    pub version: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: "tether".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: Vec<ConnectionConfig>,
}

/// Load server configs from a TOML file with `[[servers]]` tables.
pub fn load_servers_file<P: AsRef<Path>>(path: P) -> Result<Vec<ConnectionConfig>> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let parsed: ServersFile =
        toml::from_str(&raw).map_err(|e| McpError::Config(format!("invalid servers file: {e}")))?;
    for config in &parsed.servers {
        config.validate()?;
    }
    Ok(parsed.servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_serialization_round_trip() {
        let config = ConnectionConfig {
            id: "filesystem".to_string(),
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "server-filesystem".to_string()],
            env: None,
            working_dir: Some("/tmp".to_string()),
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("filesystem"));
        assert!(json.contains("npx"));

        let deserialized: ConnectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.id, "filesystem");
        assert_eq!(deserialized.args.len(), 2);
    }

    #[test]
    fn validate_rejects_blank_fields() {
        let config = ConnectionConfig {
            id: "".to_string(),
            command: "node".to_string(),
            args: vec![],
            env: None,
            working_dir: None,
        };
        assert!(config.validate().is_err());

        let config = ConnectionConfig {
            id: "echo".to_string(),
            command: "  ".to_string(),
            args: vec![],
            env: None,
            working_dir: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_servers_from_toml() {
        let toml_content = r#"
            [[servers]]
            id = "filesystem"
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]

            [[servers]]
            id = "search"
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-brave-search"]

            [servers.env]
            API_KEY = "test"
        "#;

        let parsed: ServersFile = toml::from_str(toml_content).unwrap();
        assert_eq!(parsed.servers.len(), 2);
        assert_eq!(parsed.servers[0].id, "filesystem");
        assert_eq!(parsed.servers[0].args.len(), 3);
        assert_eq!(parsed.servers[1].id, "search");
        assert!(parsed.servers[1].env.is_some());
    }

    #[test]
    fn load_servers_file_reads_and_validates() {
        let path = std::env::temp_dir().join(format!("tether-servers-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
                [[servers]]
                id = "echo"
                command = "echo-mcp-server"
            "#,
        )
        .unwrap();

        let servers = load_servers_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "echo");
        assert!(servers[0].args.is_empty());
    }

    #[test]
    fn load_servers_file_missing_path_is_io_error() {
        let err = load_servers_file("/nonexistent/servers.toml").unwrap_err();
        assert!(matches!(err, McpError::Io(_)));
    }

    #[test]
    fn default_client_settings() {
        let settings = ClientSettings::default();
        assert_eq!(settings.name, "tether");
        assert!(!settings.version.is_empty());
    }
}
