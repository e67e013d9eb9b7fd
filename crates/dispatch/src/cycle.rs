use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use common::actors::{Actor, ActorType, ControlMessage};
use common::config::ScanConfig;
use common::models::{AccountSnapshot, RejectReason, SignalDraft};
use producers::ProducerPool;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info};
use uuid::Uuid;

use crate::account::AccountBook;

/// Why a scan would be wasted right now, if it would.
pub fn scan_gate(account: &AccountSnapshot) -> Option<RejectReason> {
    if !account.auto_trade {
        Some(RejectReason::AutoTradeDisabled)
    } else if account.daily_target > 0.0 && account.daily_profit >= account.daily_target {
        Some(RejectReason::DailyTargetReached)
    } else if account.daily_trade_count >= account.max_daily_trades {
        Some(RejectReason::DailyTradeLimit)
    } else {
        None
    }
}

/// Periodically scans every producer and hands the drafts to the dispatcher.
pub struct TradingCycle {
    id: Uuid,
    pool: Arc<ProducerPool>,
    book: Arc<AccountBook>,
    batches: mpsc::Sender<Vec<SignalDraft>>,
    cfg: ScanConfig,
}

impl TradingCycle {
    pub fn new(
        pool: Arc<ProducerPool>,
        book: Arc<AccountBook>,
        batches: mpsc::Sender<Vec<SignalDraft>>,
        cfg: ScanConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool,
            book,
            batches,
            cfg,
        }
    }

    async fn cycle(&self, supervisor_tx: &mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        loop {
            let account = self.book.snapshot().await;
            if let Some(reason) = scan_gate(&account) {
                debug!("Skipping scan: {}", reason);
                time::sleep(self.cfg.idle_interval).await;
                continue;
            }

            let report = self.pool.scan().await;
            if report.failed > 0 {
                supervisor_tx
                    .send(ControlMessage::Error(
                        self.id,
                        format!("{} of {} sources failed", report.failed, self.pool.len()),
                    ))
                    .await?;
            }

            if !report.drafts.is_empty() && self.batches.send(report.drafts).await.is_err() {
                bail!("dispatcher is no longer accepting signals");
            }

            time::sleep(self.cfg.interval).await;
        }
    }
}

#[async_trait]
impl Actor for TradingCycle {
    fn name(&self) -> ActorType {
        ActorType::TradingCycle
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        info!("Trading cycle started over {} sources", self.pool.len());
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        let result = self.cycle(&supervisor_tx).await;
        heartbeat_handle.abort();
        result
    }
}
