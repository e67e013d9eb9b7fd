use std::sync::Arc;

use common::models::SignalDraft;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::traits::SourceFetcher;
use crate::{Producer, SourceError};

/// Result of one scan over every configured producer.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub drafts: Vec<SignalDraft>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Fans a scan out over all producers with bounded parallelism. A failing or
/// slow source only loses its own signals.
pub struct ProducerPool {
    fetcher: Arc<dyn SourceFetcher>,
    producers: Vec<Producer>,
    semaphore: Arc<Semaphore>,
}

impl ProducerPool {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, producers: Vec<Producer>, concurrency: usize) -> Self {
        Self {
            fetcher,
            producers,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub async fn scan(&self) -> ScanReport {
        let mut tasks = JoinSet::new();

        for producer in self.producers.iter().cloned() {
            let fetcher = self.fetcher.clone();
            let semaphore = self.semaphore.clone();
            tasks.spawn(async move {
                let name = producer.source.name.clone();
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => Self::run_producer(fetcher.as_ref(), &producer).await,
                    Err(e) => Err(SourceError::Transport(format!("pool closed: {e}"))),
                };
                (name, result)
            });
        }

        let mut report = ScanReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(drafts))) => {
                    debug!("{} produced {} signals", name, drafts.len());
                    report.succeeded += 1;
                    report.drafts.extend(drafts);
                }
                Ok((name, Err(e))) => {
                    warn!("Source {} contributed nothing: {}", name, e);
                    report.failed += 1;
                }
                Err(e) => {
                    error!("Source task crashed: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Scan finished: {} signals from {}/{} sources",
            report.drafts.len(),
            report.succeeded,
            self.producers.len()
        );
        report
    }

    async fn run_producer(
        fetcher: &dyn SourceFetcher,
        producer: &Producer,
    ) -> Result<Vec<SignalDraft>, SourceError> {
        let limit = producer.source.timeout();
        let work = async {
            let raw = fetcher.fetch(&producer.source).await?;
            producer.parser.parse(&producer.source, &raw)
        };
        time::timeout(limit, work)
            .await
            .map_err(|_| SourceError::Timeout(limit))?
    }
}
