use async_trait::async_trait;
use common::models::SignalDraft;

use crate::{SourceError, SourceConfig};

/// Pulls raw content for one configured source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &SourceConfig) -> Result<String, SourceError>;
}

/// Turns a source's raw content into candidate signals. Must be pure.
pub trait SignalParser: Send + Sync {
    fn parse(&self, source: &SourceConfig, raw: &str) -> Result<Vec<SignalDraft>, SourceError>;
}
