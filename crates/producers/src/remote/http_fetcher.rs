use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::traits::SourceFetcher;
use crate::{SourceConfig, SourceError};

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent("signal_dispatch/0.1.0")
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceConfig) -> Result<String, SourceError> {
        let response = self
            .client
            .get(&source.url)
            .header("Accept", "application/json,text/html;q=0.9,*/*;q=0.8")
            .timeout(source.timeout())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            warn!("{} is rate limiting us", source.name);
            return Err(SourceError::RateLimited(source.name.clone()));
        }
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: source.url.clone(),
            });
        }

        let body = response.text().await?;
        debug!("Fetched {} bytes from {}", body.len(), source.name);
        Ok(body)
    }
}
