//! Endpoint configuration

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed YAML or wrong field types
    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result streaming limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bytes buffered before a chunk is handed to the response body
    pub chunk_size: usize,
    /// Chunks that may wait in the body channel before serialization pauses
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            channel_capacity: 16,
        }
    }
}

/// SPARQL endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Bind address
    pub address: String,
    /// Port
    pub port: u16,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// Add permissive CORS headers
    pub cors: bool,
    /// Query the union of all graphs as the default graph
    pub union_default_graph: bool,
    pub streaming: StreamingConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 2 * 1024 * 1024,
            cors: false,
            union_default_graph: false,
            streaming: StreamingConfig::default(),
        }
    }
}

impl EndpointConfig {
    /// Parse a YAML document; missing fields keep their defaults
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}
