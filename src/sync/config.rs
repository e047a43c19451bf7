//! Sync server configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{LixError, LixResult};
use crate::observability::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 3005)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding one `<lix_id>.lix` blob per hosted instance;
    /// instances live in memory only when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// CORS allowed origins; any origin when empty
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Minimum log severity ("TRACE" through "FATAL")
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3005
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            cors_origins: Vec::new(),
            log_level: None,
        }
    }
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> LixResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LixError::io(format!("failed to read server config {}", path.display()), e)
        })?;
        let config: ServerConfig = serde_json::from_str(&content)
            .map_err(|e| LixError::InvalidInput(format!("invalid server config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LixResult<()> {
        if self.host.trim().is_empty() {
            return Err(LixError::InvalidInput("host is empty".to_string()));
        }
        if let Some(level) = &self.log_level {
            level.parse::<Severity>().map_err(|_| {
                LixError::InvalidInput(format!("invalid log_level: '{}'", level))
            })?;
        }
        if let Some(dir) = &self.data_dir {
            if dir.is_file() {
                return Err(LixError::InvalidInput(format!(
                    "data_dir {} is a file",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn severity(&self) -> Option<Severity> {
        self.log_level.as_deref().and_then(|level| level.parse().ok())
    }
}
