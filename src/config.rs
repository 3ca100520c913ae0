//! Configuration for the relay

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Program to run on the PTY
    pub program: String,
    /// Longest single wait for input or output, in milliseconds
    pub poll_interval_ms: u32,
    /// Size of the read buffer for each direction
    pub read_buffer_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            program: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            poll_interval_ms: 100,
            read_buffer_size: 4096,
        }
    }
}

impl RelayConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(text)?;
        if config.read_buffer_size == 0 {
            config.read_buffer_size = Self::default().read_buffer_size;
        }
        Ok(config)
    }
}
