use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::TokenError;
use crate::core::model::DiscoveryConfiguration;
use crate::core::services::TokenProvider;
use crate::core::simulator::SimulatorOptions;
use crate::core::token::{HttpTokenProvider, StaticTokenProvider, PLACEHOLDER_TOKEN_URL};

/// Everything a run needs; loaded from a JSON file and then overridden by
/// command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CyclerConfig {
    pub token_url: String,
    /// Skip the token endpoint and hand this secret to the backend
    pub static_token: Option<String>,
    pub token_timeout_secs: u64,
    pub discovery: DiscoveryConfiguration,
    pub max_cycles: Option<u64>,
    pub simulator: SimulatorOptions,
}

impl Default for CyclerConfig {
    fn default() -> Self {
        Self {
            token_url: PLACEHOLDER_TOKEN_URL.to_string(),
            static_token: None,
            token_timeout_secs: 30,
            discovery: DiscoveryConfiguration::default(),
            max_cycles: None,
            simulator: SimulatorOptions::default(),
        }
    }
}

impl CyclerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Static secret when one is configured, the HTTP endpoint otherwise
    pub fn token_provider(&self) -> Result<Arc<dyn TokenProvider>, TokenError> {
        match &self.static_token {
            Some(secret) => Ok(Arc::new(StaticTokenProvider::new(secret.clone()))),
            None => Ok(Arc::new(HttpTokenProvider::new(
                self.token_url.clone(),
                Duration::from_secs(self.token_timeout_secs),
            )?)),
        }
    }
}
