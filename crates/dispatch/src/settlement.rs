use std::sync::Arc;
use std::time::Duration;

use common::backoff::{RetryPolicy, retry_with_backoff};
use common::config::SettlementConfig;
use common::models::{Position, Signal, SignalStatus, TradeEvent};
use thiserror::Error;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::account::{AccountBook, SettlementApplied};
use crate::error::AccountError;
use crate::journal::Journal;
use crate::oracle::{OracleError, OutcomeOracle};

/// A position whose outcome could not be established. Never dropped: it is
/// escalated for manual reconciliation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("contract {contract_id} unresolved after {attempts} attempts: {source}")]
    Unresolved {
        contract_id: String,
        attempts: u32,
        source: OracleError,
    },
}

/// Waits out an open position, resolves it and applies the result to the
/// account exactly once.
pub struct SettlementMonitor {
    book: Arc<AccountBook>,
    oracle: Arc<dyn OutcomeOracle>,
    journal: Journal,
    cfg: SettlementConfig,
}

impl SettlementMonitor {
    pub fn new(
        book: Arc<AccountBook>,
        oracle: Arc<dyn OutcomeOracle>,
        journal: Journal,
        cfg: SettlementConfig,
    ) -> Self {
        Self {
            book,
            oracle,
            journal,
            cfg,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.cfg.retries,
            self.cfg.retry_base,
            self.cfg.retry_base.saturating_mul(16),
        )
        .with_jitter(0.1)
    }

    /// Returns the signal's final status for this run: `Settled`, or `Open`
    /// when monitoring was cancelled or the outcome could not be resolved.
    pub async fn monitor(
        &self,
        mut signal: Signal,
        position: Position,
        cancel: CancellationToken,
    ) -> Result<SignalStatus, AccountError> {
        let duration = Duration::from_secs(position.duration_secs);
        let deadline = Instant::now() + duration;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.journal.publish(TradeEvent::Countdown {
                signal_id: signal.id,
                contract_id: position.contract_id.clone(),
                symbol: position.symbol.clone(),
                remaining_secs: remaining.as_secs(),
            });

            let nap = if self.cfg.countdown_interval.is_zero() {
                remaining
            } else {
                remaining.min(self.cfg.countdown_interval)
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    error!(
                        target: "reconciliation",
                        signal_id = %signal.id,
                        contract_id = %position.contract_id,
                        symbol = %position.symbol,
                        stake = position.stake,
                        opened_at = %position.opened_at,
                        remaining_secs = remaining.as_secs(),
                        "Position left open at shutdown"
                    );
                    return Ok(signal.status());
                }
                _ = time::sleep(nap) => {}
            }
        }

        let policy = self.retry_policy();
        let oracle = self.oracle.as_ref();
        let (sig, pos) = (&signal, &position);
        let resolved = tokio::select! {
            _ = cancel.cancelled() => {
                error!(
                    target: "reconciliation",
                    signal_id = %signal.id,
                    contract_id = %position.contract_id,
                    symbol = %position.symbol,
                    stake = position.stake,
                    opened_at = %position.opened_at,
                    remaining_secs = 0u64,
                    "Position expired but unresolved at shutdown"
                );
                return Ok(signal.status());
            }
            r = retry_with_backoff(
                &policy,
                move |_| oracle.resolve(sig, pos),
                |attempt, e, delay| {
                    warn!(
                        "Resolving {} failed (attempt {}): {}. Retrying in {:?}",
                        position.contract_id, attempt + 1, e, delay
                    )
                },
            ) => r,
        };

        let outcome = match resolved {
            Ok(outcome) => outcome,
            Err(source) => {
                let e = SettlementError::Unresolved {
                    contract_id: position.contract_id.clone(),
                    attempts: policy.attempts,
                    source,
                };
                error!(
                    target: "reconciliation",
                    signal_id = %signal.id,
                    contract_id = %position.contract_id,
                    symbol = %position.symbol,
                    stake = position.stake,
                    opened_at = %position.opened_at,
                    remaining_secs = 0u64,
                    "{}",
                    e
                );
                self.journal.publish(TradeEvent::Escalated {
                    signal_id: signal.id,
                    contract_id: position.contract_id.clone(),
                    reason: e.to_string(),
                });
                return Ok(signal.status());
            }
        };

        match self
            .book
            .apply_settlement(&position, outcome, self.cfg.payout_factor)
            .await?
        {
            SettlementApplied::Applied {
                settlement,
                account,
            } => {
                if let Err(e) = signal.transition(SignalStatus::Settled) {
                    error!("{}", e);
                }
                info!(
                    "Settled {} {} {}: {} {:+.2}, balance {:.2}",
                    signal.short_id(),
                    position.symbol,
                    position.contract_id,
                    settlement.outcome.as_str(),
                    settlement.profit,
                    settlement.balance_after
                );
                self.journal
                    .sink()
                    .record_position(&position, Some(&settlement));
                self.journal.signal_event(TradeEvent::Settled {
                    signal: signal.clone(),
                    settlement,
                    account,
                });
            }
            SettlementApplied::Duplicate => {
                warn!("Contract {} was already settled", position.contract_id);
            }
        }
        Ok(signal.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockOutcomeOracle;
    use crate::registry::SubscriberRegistry;
    use chrono::{NaiveDate, Utc};
    use common::config::{EngineConfig, Profile};
    use common::models::{Direction, Outcome, SignalDraft};
    use common::sink::NullSink;

    struct Fixture {
        book: Arc<AccountBook>,
        registry: SubscriberRegistry,
        cfg: SettlementConfig,
    }

    fn fixture() -> Fixture {
        let cfg = EngineConfig::for_profile(Profile::Aggressive);
        Fixture {
            book: Arc::new(AccountBook::new(
                &cfg.account,
                1000.0,
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            )),
            registry: SubscriberRegistry::new(256, 0),
            cfg: cfg.settlement,
        }
    }

    impl Fixture {
        fn monitor(&self, oracle: MockOutcomeOracle) -> SettlementMonitor {
            SettlementMonitor::new(
                self.book.clone(),
                Arc::new(oracle),
                Journal::new(self.registry.clone(), Arc::new(NullSink)),
                self.cfg.clone(),
            )
        }
    }

    fn open_signal() -> (Signal, Position) {
        let mut s = Signal::from_draft(SignalDraft::new("feed", "R_75", Direction::Up, 0.9, "t"));
        s.admit(20.0).unwrap();
        s.transition(SignalStatus::Executing).unwrap();
        s.transition(SignalStatus::Open).unwrap();
        let p = Position {
            signal_id: s.id,
            contract_id: "C-1".to_string(),
            symbol: "R_75".to_string(),
            direction: Direction::Up,
            stake: 20.0,
            opened_at: Utc::now(),
            duration_secs: 180,
        };
        (s, p)
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_then_settles() {
        let fx = fixture();
        let mut sub = fx.registry.subscribe();
        let mut oracle = MockOutcomeOracle::new();
        oracle.expect_resolve().times(1).returning(|_, _| Ok(Outcome::Win));

        let (s, p) = open_signal();
        let status = fx
            .monitor(oracle)
            .monitor(s, p, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, SignalStatus::Settled);

        let mut countdowns = Vec::new();
        let mut settled = None;
        while let Some(ev) = sub.try_recv() {
            match &ev.event {
                TradeEvent::Countdown { remaining_secs, .. } => countdowns.push(*remaining_secs),
                TradeEvent::Settled { settlement, .. } => settled = Some(settlement.clone()),
                _ => {}
            }
        }
        assert_eq!(countdowns.len(), 12);
        assert_eq!(countdowns[0], 180);
        assert_eq!(*countdowns.last().unwrap(), 15);
        let settled = settled.expect("settled event");
        assert!((settled.profit - 17.0).abs() < 1e-9);
        assert!((fx.book.snapshot().await.current_balance - 1017.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_countdown_interval_does_not_flood_subscribers() {
        let mut fx = fixture();
        fx.cfg.countdown_interval = Duration::ZERO;
        let mut sub = fx.registry.subscribe();
        let mut oracle = MockOutcomeOracle::new();
        oracle.expect_resolve().times(1).returning(|_, _| Ok(Outcome::Win));

        let (s, mut p) = open_signal();
        p.duration_secs = 1;
        let status = fx
            .monitor(oracle)
            .monitor(s, p, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, SignalStatus::Settled);

        let mut countdowns = 0;
        while let Some(ev) = sub.try_recv() {
            if matches!(ev.event, TradeEvent::Countdown { .. }) {
                countdowns += 1;
            }
        }
        assert_eq!(countdowns, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_escalates_without_touching_the_account() {
        let fx = fixture();
        let mut sub = fx.registry.subscribe();
        let mut oracle = MockOutcomeOracle::new();
        oracle
            .expect_resolve()
            .times(5)
            .returning(|_, _| Err(OracleError::Unavailable("feed down".to_string())));

        let (s, p) = open_signal();
        let status = fx
            .monitor(oracle)
            .monitor(s, p, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, SignalStatus::Open);

        let mut escalated = false;
        while let Some(ev) = sub.try_recv() {
            if let TradeEvent::Escalated { contract_id, reason, .. } = &ev.event {
                assert_eq!(contract_id, "C-1");
                assert!(reason.contains("after 5 attempts"));
                escalated = true;
            }
        }
        assert!(escalated);
        assert_eq!(fx.book.snapshot().await.current_balance, 1000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_outcome_is_retried() {
        let fx = fixture();
        let mut oracle = MockOutcomeOracle::new();
        let mut seq = mockall::Sequence::new();
        oracle
            .expect_resolve()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, p| Err(OracleError::Pending(p.contract_id.clone())));
        oracle
            .expect_resolve()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Outcome::Loss));

        let (s, p) = open_signal();
        let status = fx
            .monitor(oracle)
            .monitor(s, p, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, SignalStatus::Settled);
        assert_eq!(fx.book.snapshot().await.current_balance, 980.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_leaves_position_open() {
        let fx = fixture();
        let mut oracle = MockOutcomeOracle::new();
        oracle.expect_resolve().never();

        let token = CancellationToken::new();
        let (s, p) = open_signal();
        let monitor = fx.monitor(oracle);
        let run = monitor.monitor(s, p, token.clone());
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("monitor finished before the position expired"),
            _ = time::sleep(Duration::from_secs(40)) => {}
        }
        token.cancel();
        assert_eq!(run.await.unwrap(), SignalStatus::Open);
        assert_eq!(fx.book.snapshot().await.total_trades, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn replayed_settlement_is_ignored() {
        let fx = fixture();
        let (s, p) = open_signal();
        fx.book.apply_settlement(&p, Outcome::Win, 0.85).await.unwrap();

        let mut oracle = MockOutcomeOracle::new();
        oracle.expect_resolve().returning(|_, _| Ok(Outcome::Win));
        let status = fx
            .monitor(oracle)
            .monitor(s, p, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, SignalStatus::Open);
        assert!((fx.book.snapshot().await.current_balance - 1017.0).abs() < 1e-9);
    }
}
