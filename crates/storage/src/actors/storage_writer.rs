use std::time::Duration;

use common::backoff::{RetryPolicy, retry_with_backoff};
use common::models::{DailySummary, Position, Settlement, Signal};
use common::sink::PersistenceSink;
use sqlx::SqlitePool;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::repositories::{DailySummaryRepository, PositionsRepository, SignalsRepository};

const BATCH_SIZE: usize = 64;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);
/// Settlements kept for a later flush after the database refused them.
const MAX_RETAINED_SETTLEMENTS: usize = 1024;

#[derive(Debug, Clone)]
pub enum StorageCommand {
    Signal(Signal),
    Position(Position, Option<Settlement>),
    Daily(DailySummary),
}

/// Non-blocking handle given to the engine. Writes are queued; a full queue
/// drops the write with a warning instead of stalling the pipeline.
#[derive(Clone)]
pub struct StorageSink {
    tx: mpsc::Sender<StorageCommand>,
}

impl StorageSink {
    fn push(&self, cmd: StorageCommand) {
        match self.tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) => warn!("Storage queue full, dropped write: {:?}", cmd),
            Err(TrySendError::Closed(_)) => warn!("Storage writer is gone, write discarded"),
        }
    }
}

impl PersistenceSink for StorageSink {
    fn record_signal(&self, signal: &Signal) {
        self.push(StorageCommand::Signal(signal.clone()));
    }

    fn record_position(&self, position: &Position, settlement: Option<&Settlement>) {
        self.push(StorageCommand::Position(position.clone(), settlement.cloned()));
    }

    fn record_daily_summary(&self, summary: &DailySummary) {
        self.push(StorageCommand::Daily(summary.clone()));
    }
}

pub struct StorageWriter {
    pool: SqlitePool,
    rx: mpsc::Receiver<StorageCommand>,
    retry: RetryPolicy,
}

impl StorageWriter {
    pub fn channel(pool: SqlitePool, capacity: usize) -> (StorageSink, StorageWriter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let retry = RetryPolicy::new(3, Duration::from_millis(250), Duration::from_secs(2));
        (StorageSink { tx }, StorageWriter { pool, rx, retry })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Drains the queue in batches until every sink handle is dropped or
    /// shutdown is requested; pending writes are flushed either way.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting storage writer");
        let mut buffer = Vec::with_capacity(BATCH_SIZE);
        let mut ticker = time::interval(FLUSH_INTERVAL);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        buffer.push(cmd);
                        if buffer.len() >= BATCH_SIZE {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        info!("Storage channel closed. Flushing remaining buffer.");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
                _ = shutdown.cancelled() => {
                    while let Ok(cmd) = self.rx.try_recv() {
                        buffer.push(cmd);
                    }
                    break;
                }
            }
        }

        if !buffer.is_empty() {
            self.flush(&mut buffer).await;
        }
        for cmd in &buffer {
            if let StorageCommand::Position(position, Some(settlement)) = cmd {
                unpersisted(position, settlement, "writer stopped with settlement unsaved");
            }
        }
        info!("Storage writer stopped");
    }

    /// Writes the buffer, retrying with backoff. If the database keeps
    /// failing, settlements stay buffered for the next flush and everything
    /// else is dropped.
    async fn flush(&self, buffer: &mut Vec<StorageCommand>) {
        let count = buffer.len();
        let batch = &buffer[..];
        let written = retry_with_backoff(
            &self.retry,
            |_| self.write_batch(batch),
            |attempt, e, delay| {
                warn!(
                    "DB write of {} records failed (attempt {}): {}. Retrying in {:?}",
                    count,
                    attempt + 1,
                    e,
                    delay
                )
            },
        )
        .await;

        match written {
            Ok(()) => {
                debug!("Wrote {} records", count);
                buffer.clear();
            }
            Err(e) => {
                error!("DB write of {} records failed: {}", count, e);
                buffer.retain(|cmd| matches!(cmd, StorageCommand::Position(_, Some(_))));
                if buffer.len() > MAX_RETAINED_SETTLEMENTS {
                    let overflow = buffer.len() - MAX_RETAINED_SETTLEMENTS;
                    for cmd in buffer.drain(..overflow) {
                        if let StorageCommand::Position(position, Some(settlement)) = cmd {
                            unpersisted(&position, &settlement, "dropped after repeated write failures");
                        }
                    }
                }
                if !buffer.is_empty() {
                    warn!("Keeping {} settlements for the next flush", buffer.len());
                }
            }
        }
    }

    async fn write_batch(&self, batch: &[StorageCommand]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for cmd in batch {
            match cmd {
                StorageCommand::Signal(signal) => SignalsRepository::upsert(&mut *tx, signal).await?,
                StorageCommand::Position(position, None) => {
                    PositionsRepository::insert_open(&mut *tx, position).await?
                }
                StorageCommand::Position(position, Some(settlement)) => {
                    PositionsRepository::settle(&mut *tx, position, settlement).await?
                }
                StorageCommand::Daily(summary) => DailySummaryRepository::upsert(&mut *tx, summary).await?,
            }
        }
        tx.commit().await
    }
}

fn unpersisted(position: &Position, settlement: &Settlement, why: &str) {
    error!(
        target: "reconciliation",
        signal_id = %position.signal_id,
        contract_id = %position.contract_id,
        symbol = %position.symbol,
        stake = position.stake,
        outcome = settlement.outcome.as_str(),
        pnl = settlement.profit,
        "Settlement not persisted: {}",
        why
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;
    use chrono::{NaiveDate, Utc};
    use common::models::{Direction, Outcome, SignalDraft, SignalStatus};

    fn signal() -> Signal {
        Signal::from_draft(SignalDraft::new("feed", "EURUSD", Direction::Up, 0.9, "trend"))
    }

    #[tokio::test]
    async fn signal_status_is_upserted() {
        let pool = connect_in_memory().await.unwrap();
        let (sink, writer) = StorageWriter::channel(pool.clone(), 16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(writer.run(shutdown.clone()));

        let mut s = signal();
        sink.record_signal(&s);
        s.admit(23.0).unwrap();
        sink.record_signal(&s);
        s.transition(SignalStatus::Executing).unwrap();
        sink.record_signal(&s);

        shutdown.cancel();
        handle.await.unwrap();

        let status = SignalsRepository::status_of(&pool, &s.id.to_string()).await.unwrap();
        assert_eq!(status.as_deref(), Some("executing"));
        assert_eq!(SignalsRepository::count_by_status(&pool, "new").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn position_settles_once() {
        let pool = connect_in_memory().await.unwrap();
        let (sink, writer) = StorageWriter::channel(pool.clone(), 16);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(writer.run(shutdown.clone()));

        let position = Position {
            signal_id: uuid::Uuid::new_v4(),
            contract_id: "C-1".to_string(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Up,
            stake: 20.0,
            opened_at: Utc::now(),
            duration_secs: 180,
        };
        let win = Settlement {
            signal_id: position.signal_id,
            contract_id: "C-1".to_string(),
            outcome: Outcome::Win,
            profit: 17.0,
            balance_after: 1017.0,
            settled_at: Utc::now(),
        };
        let replay = Settlement {
            outcome: Outcome::Loss,
            profit: -20.0,
            ..win.clone()
        };

        sink.record_position(&position, None);
        sink.record_position(&position, Some(&win));
        sink.record_position(&position, Some(&replay));
        sink.record_daily_summary(&DailySummary {
            day: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            daily_profit: 17.0,
            trades: 1,
            wins: 1,
            closing_balance: 1017.0,
        });

        shutdown.cancel();
        handle.await.unwrap();

        let row = PositionsRepository::result_of(&pool, &position.signal_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row, (Some("win".to_string()), Some(17.0)));
        let day = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        assert_eq!(DailySummaryRepository::profit_for(&pool, day).await.unwrap(), Some(17.0));
    }

    #[tokio::test]
    async fn failed_write_keeps_settlements_for_the_next_flush() {
        let pool = connect_in_memory().await.unwrap();
        sqlx::query("DROP TABLE positions").execute(&pool).await.unwrap();
        let (_sink, writer) = StorageWriter::channel(pool.clone(), 16);
        let writer = writer.with_retry(RetryPolicy::new(
            2,
            Duration::from_millis(1),
            Duration::from_millis(1),
        ));

        let position = Position {
            signal_id: uuid::Uuid::new_v4(),
            contract_id: "C-7".to_string(),
            symbol: "R_10".to_string(),
            direction: Direction::Down,
            stake: 25.0,
            opened_at: Utc::now(),
            duration_secs: 180,
        };
        let settlement = Settlement {
            signal_id: position.signal_id,
            contract_id: "C-7".to_string(),
            outcome: Outcome::Loss,
            profit: -25.0,
            balance_after: 975.0,
            settled_at: Utc::now(),
        };
        let mut buffer = vec![
            StorageCommand::Signal(signal()),
            StorageCommand::Position(position.clone(), None),
            StorageCommand::Position(position.clone(), Some(settlement)),
        ];

        writer.flush(&mut buffer).await;
        assert_eq!(buffer.len(), 1);
        assert!(matches!(buffer[0], StorageCommand::Position(_, Some(_))));

        crate::db::apply_schema(&pool).await.unwrap();
        writer.flush(&mut buffer).await;
        assert!(buffer.is_empty());
        let row = PositionsRepository::result_of(&pool, &position.signal_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row, (Some("loss".to_string()), Some(-25.0)));
    }
}
