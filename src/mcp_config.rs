//! The `mcpServers` configuration desktop chat clients use to launch the server.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "dcc-guides": {
//!       "command": "/path/to/guia",
//!       "args": ["--directory", "/path/to/agent", "serve"]
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Key the documentation server is registered under
pub const SERVER_NAME: &str = "dcc-guides";

/// Launch settings for one server process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerEntry {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A client configuration file; keys other than `mcpServers` are kept as-is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpClientConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl McpClientConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid MCP client configuration")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Configuration containing only the documentation server
    pub fn for_guides(entry: McpServerEntry) -> Self {
        let mut config = Self::default();
        config.mcp_servers.insert(SERVER_NAME.to_string(), entry);
        config
    }
}

/// Entry launching `command` against the agent directory
pub fn guides_entry(command: &str, directory: &Path) -> McpServerEntry {
    McpServerEntry {
        command: command.to_string(),
        args: vec![
            "--directory".to_string(),
            directory.display().to_string(),
            "serve".to_string(),
        ],
        env: None,
        extra: serde_json::Map::new(),
    }
}

/// Check that the documentation server is registered against `expected_directory`
pub fn validate_guides(config: &McpClientConfig, expected_directory: &Path) -> Result<()> {
    let entry = config
        .mcp_servers
        .get(SERVER_NAME)
        .with_context(|| format!("mcpServers has no '{SERVER_NAME}' entry"))?;

    if entry.command.trim().is_empty() {
        anyhow::bail!("'{SERVER_NAME}' has an empty command");
    }

    let directory = entry
        .args
        .iter()
        .position(|arg| arg == "--directory")
        .and_then(|i| entry.args.get(i + 1))
        .with_context(|| format!("'{SERVER_NAME}' args lack a --directory value"))?;

    if Path::new(directory) != expected_directory {
        anyhow::bail!(
            "'{SERVER_NAME}' points at {}, expected {}",
            directory,
            expected_directory.display()
        );
    }

    if !entry.args.iter().any(|arg| arg == "serve") {
        anyhow::bail!("'{SERVER_NAME}' args do not start the server");
    }

    Ok(())
}

/// Add or replace the documentation server in a client configuration file
pub fn install(path: &Path, entry: McpServerEntry) -> Result<McpClientConfig> {
    let mut config = if path.exists() {
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        if raw.trim().is_empty() {
            McpClientConfig::default()
        } else {
            McpClientConfig::from_json(&raw).with_context(|| format!("in {}", path.display()))?
        }
    } else {
        McpClientConfig::default()
    };

    if config.mcp_servers.insert(SERVER_NAME.to_string(), entry).is_some() {
        tracing::info!("Replacing existing '{}' entry in {}", SERVER_NAME, path.display());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config.to_json()?).with_context(|| format!("failed to write {}", path.display()))?;

    Ok(config)
}
