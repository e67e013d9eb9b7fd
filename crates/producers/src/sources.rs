use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::SourceError;
use crate::remote::JsonFeedParser;
use crate::traits::SignalParser;

fn default_timeout_secs() -> u64 {
    10
}

fn default_active() -> bool {
    true
}

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A configured source paired with the parser for its content.
#[derive(Clone)]
pub struct Producer {
    pub source: SourceConfig,
    pub parser: Arc<dyn SignalParser>,
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").field("source", &self.source).finish()
    }
}

impl Producer {
    pub fn new(source: SourceConfig, parser: Arc<dyn SignalParser>) -> Self {
        Self { source, parser }
    }

    /// Picks the parser matching the source's declared format.
    pub fn from_config(source: SourceConfig) -> Result<Self, SourceError> {
        let parser: Arc<dyn SignalParser> = match source.format.as_str() {
            "json" => Arc::new(JsonFeedParser),
            other => return Err(SourceError::UnsupportedFormat(other.to_string())),
        };
        Ok(Self::new(source, parser))
    }
}

pub fn parse_sources(raw: &str) -> Result<Vec<Producer>, SourceError> {
    let configs: Vec<SourceConfig> =
        serde_json::from_str(raw).map_err(|e| SourceError::Parse(e.to_string()))?;

    configs
        .into_iter()
        .filter(|c| c.active)
        .map(Producer::from_config)
        .collect()
}

pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<Producer>, SourceError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| SourceError::Config {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_sources(&raw).map_err(|e| SourceError::Config {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
