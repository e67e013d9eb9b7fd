use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Local;
use common::config::DispatchConfig;
use common::models::{RejectReason, Signal, SignalDraft, SignalStatus, TradeEvent};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::account::AccountBook;
use crate::admission::AdmissionController;
use crate::error::{AccountError, EngineError};
use crate::executor::{ExecutionError, Executor};
use crate::journal::Journal;
use crate::rate_limit::SlidingWindow;
use crate::settlement::SettlementMonitor;

struct Queued {
    signal: Signal,
    admitted_at: Instant,
}

/// Everything a trade task needs once it leaves the dispatcher.
#[derive(Clone)]
pub(crate) struct TradeContext {
    pub(crate) book: Arc<AccountBook>,
    pub(crate) executor: Arc<Executor>,
    pub(crate) settlement: Arc<SettlementMonitor>,
    pub(crate) journal: Journal,
}

/// Shapes one scan's drafts: optional `(symbol, direction)` dedup keeping the
/// most confident entry, highest confidence first, at most `max_signals_per_cycle`.
pub fn prepare_batch(mut drafts: Vec<SignalDraft>, cfg: &DispatchConfig) -> Vec<SignalDraft> {
    drafts.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if cfg.dedup_signals {
        let mut seen = HashSet::new();
        drafts.retain(|d| seen.insert((d.symbol.clone(), d.direction)));
    }
    if cfg.max_signals_per_cycle > 0 {
        drafts.truncate(cfg.max_signals_per_cycle);
    }
    drafts
}

/// Single owner of admitted-signal ordering.
///
/// Drafts arrive in batches, are admitted one at a time, then wait in a FIFO
/// queue for the rate window. Each released signal runs as its own task
/// through execution and settlement.
pub struct Dispatcher {
    admission: AdmissionController,
    ctx: TradeContext,
    limiter: SlidingWindow,
    pending: VecDeque<Queued>,
    tasks: JoinSet<Result<(), AccountError>>,
    task_token: CancellationToken,
    cfg: DispatchConfig,
}

impl Dispatcher {
    pub(crate) fn new(admission: AdmissionController, ctx: TradeContext, cfg: DispatchConfig) -> Self {
        Self {
            admission,
            ctx,
            limiter: SlidingWindow::new(cfg.rate_limit_count, cfg.rate_limit_window),
            pending: VecDeque::new(),
            tasks: JoinSet::new(),
            task_token: CancellationToken::new(),
            cfg,
        }
    }

    /// Runs until `shutdown` fires, or until the batch channel closes and
    /// all queued and in-flight signals are done.
    pub async fn run(
        mut self,
        batches: mpsc::Receiver<Vec<SignalDraft>>,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        let result = self.event_loop(batches, shutdown).await;
        if let Err(e) = &result {
            error!("Dispatcher stopping on fatal error: {}", e);
        }
        self.stop().await;
        result
    }

    async fn event_loop(
        &mut self,
        mut batches: mpsc::Receiver<Vec<SignalDraft>>,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        let mut tick = time::interval(self.cfg.rate_check_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inputs_open = true;

        info!(
            "Dispatcher running: {} executions per {:?}",
            self.cfg.rate_limit_count, self.cfg.rate_limit_window
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Dispatcher shutting down");
                    return Ok(());
                }
                batch = batches.recv(), if inputs_open => match batch {
                    Some(drafts) => {
                        self.roll_day().await?;
                        self.handle_batch(drafts).await?;
                        self.drain_pending().await;
                    }
                    None => {
                        debug!("Signal inputs closed");
                        inputs_open = false;
                    }
                },
                _ = tick.tick() => {
                    self.roll_day().await?;
                    self.drain_pending().await;
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    Self::on_task_done(joined)?;
                }
            }

            if !inputs_open && self.pending.is_empty() && self.tasks.is_empty() {
                info!("All signals processed");
                return Ok(());
            }
        }
    }

    fn on_task_done(joined: Result<Result<(), AccountError>, JoinError>) -> Result<(), EngineError> {
        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) if e.is_panic() => Err(EngineError::TaskPanicked(e.to_string())),
            Err(e) => {
                debug!("Trade task cancelled: {}", e);
                Ok(())
            }
        }
    }

    async fn roll_day(&mut self) -> Result<(), AccountError> {
        if let Some(summary) = self.ctx.book.roll_day(Local::now().date_naive()).await? {
            self.ctx.journal.sink().record_daily_summary(&summary);
            let account = self.ctx.book.snapshot().await;
            self.ctx
                .journal
                .publish(TradeEvent::DailyReset { summary, account });
        }
        Ok(())
    }

    async fn handle_batch(&mut self, drafts: Vec<SignalDraft>) -> Result<(), AccountError> {
        let received = drafts.len();
        let drafts = prepare_batch(drafts, &self.cfg);
        if drafts.len() < received {
            debug!("Batch of {} shaped down to {}", received, drafts.len());
        }

        for draft in drafts {
            let mut signal = Signal::from_draft(draft);
            self.ctx.journal.publish(TradeEvent::Received {
                signal: signal.clone(),
            });

            let decision = self.admission.decide(&signal).await?;
            if decision.admit {
                if let Err(e) = signal.admit(decision.stake) {
                    error!("{}", e);
                    continue;
                }
                self.ctx.journal.signal_event(TradeEvent::Admitted {
                    signal: signal.clone(),
                });
                self.pending.push_back(Queued {
                    signal,
                    admitted_at: Instant::now(),
                });
            } else {
                let reason = decision.reason.unwrap_or(RejectReason::ZeroStake);
                self.reject(signal, reason);
            }
        }
        Ok(())
    }

    fn reject(&self, mut signal: Signal, reason: RejectReason) {
        if let Err(e) = signal.transition(SignalStatus::Rejected) {
            error!("{}", e);
            return;
        }
        debug!(
            "Rejected {} {} {} ({:.2}): {}",
            signal.short_id(),
            signal.symbol,
            signal.direction,
            signal.confidence,
            reason
        );
        self.ctx
            .journal
            .signal_event(TradeEvent::Rejected { signal, reason });
    }

    async fn drain_pending(&mut self) {
        let now = Instant::now();

        while let Some(front) = self.pending.front() {
            if now.saturating_duration_since(front.admitted_at) < self.cfg.max_queue_age {
                break;
            }
            let Some(Queued { signal, .. }) = self.pending.pop_front() else {
                break;
            };
            warn!(
                "Signal {} {} waited longer than {:?} for the rate window",
                signal.short_id(),
                signal.symbol,
                self.cfg.max_queue_age
            );
            self.ctx.book.release_reservation(signal.id).await;
            self.reject(signal, RejectReason::QueueExpired);
        }

        while !self.pending.is_empty() && self.limiter.try_acquire(now) {
            let Some(Queued { mut signal, .. }) = self.pending.pop_front() else {
                break;
            };
            if let Err(e) = signal.transition(SignalStatus::Executing) {
                error!("{}", e);
                continue;
            }
            self.ctx.journal.signal_event(TradeEvent::Executing {
                signal: signal.clone(),
            });
            self.tasks.spawn(run_trade(
                self.ctx.clone(),
                signal,
                self.task_token.child_token(),
            ));
        }
    }

    async fn stop(&mut self) {
        while let Some(Queued { mut signal, .. }) = self.pending.pop_front() {
            self.ctx.book.release_reservation(signal.id).await;
            if signal.transition(SignalStatus::Failed).is_ok() {
                self.ctx.journal.signal_event(TradeEvent::Failed {
                    signal,
                    error: "engine stopped before execution".to_string(),
                });
            }
        }

        if !self.tasks.is_empty() {
            info!("Waiting for {} trade tasks to stop", self.tasks.len());
        }
        self.task_token.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = Self::on_task_done(joined) {
                error!("Trade task ended badly during shutdown: {}", e);
            }
        }
    }
}

/// Execution then settlement for one signal.
pub(crate) async fn run_trade(
    ctx: TradeContext,
    mut signal: Signal,
    cancel: CancellationToken,
) -> Result<(), AccountError> {
    let opened = tokio::select! {
        _ = cancel.cancelled() => {
            error!(
                target: "reconciliation",
                signal_id = %signal.id,
                symbol = %signal.symbol,
                stake = signal.stake().unwrap_or_default(),
                "Stopped while opening a position; contract state unknown"
            );
            return Ok(());
        }
        r = ctx.executor.open(&signal) => r,
    };

    match opened {
        Ok(position) => {
            ctx.book.mark_open(signal.id).await;
            if let Err(e) = signal.transition(SignalStatus::Open) {
                error!("{}", e);
                return Ok(());
            }
            ctx.journal.sink().record_position(&position, None);
            ctx.journal.signal_event(TradeEvent::Opened {
                signal: signal.clone(),
                position: position.clone(),
            });
            ctx.settlement.monitor(signal, position, cancel).await?;
        }
        Err(e) => {
            match &e {
                ExecutionError::Unconfirmed { quote_id, reason } => {
                    error!(
                        target: "reconciliation",
                        signal_id = %signal.id,
                        quote_id = %quote_id,
                        symbol = %signal.symbol,
                        stake = signal.stake().unwrap_or_default(),
                        "Buy sent but unconfirmed, contract may be open: {}",
                        reason
                    );
                    ctx.book.forfeit_reservation(signal.id).await;
                }
                _ => {
                    warn!("Execution of {} {} failed: {}", signal.short_id(), signal.symbol, e);
                    ctx.book.release_reservation(signal.id).await;
                }
            }
            if let Err(e) = signal.transition(SignalStatus::Failed) {
                error!("{}", e);
                return Ok(());
            }
            ctx.journal.signal_event(TradeEvent::Failed {
                signal,
                error: e.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::config::{EngineConfig, Profile};
    use common::models::Direction;

    fn draft(symbol: &str, direction: Direction, confidence: f64) -> SignalDraft {
        SignalDraft::new("feed", symbol, direction, confidence, "t")
    }

    fn cfg() -> DispatchConfig {
        EngineConfig::for_profile(Profile::Aggressive).dispatch
    }

    #[test]
    fn batch_is_deduplicated_keeping_the_strongest() {
        let out = prepare_batch(
            vec![
                draft("R_50", Direction::Up, 0.72),
                draft("R_50", Direction::Up, 0.91),
                draft("R_50", Direction::Down, 0.80),
                draft("R_10", Direction::Up, 0.75),
            ],
            &cfg(),
        );
        let view: Vec<(&str, Direction, f64)> =
            out.iter().map(|d| (d.symbol.as_str(), d.direction, d.confidence)).collect();
        assert_eq!(
            view,
            vec![
                ("R_50", Direction::Up, 0.91),
                ("R_50", Direction::Down, 0.80),
                ("R_10", Direction::Up, 0.75),
            ]
        );
    }

    #[test]
    fn dedup_can_be_disabled() {
        let mut c = cfg();
        c.dedup_signals = false;
        let out = prepare_batch(
            vec![draft("R_50", Direction::Up, 0.72), draft("R_50", Direction::Up, 0.91)],
            &c,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.91);
    }

    #[test]
    fn batch_is_truncated_to_cycle_limit() {
        let mut c = cfg();
        c.max_signals_per_cycle = 3;
        let drafts = (0..10)
            .map(|i| draft(&format!("R_{i}"), Direction::Up, 0.5 + i as f64 * 0.01))
            .collect();
        let out = prepare_batch(drafts, &c);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].symbol, "R_9");
    }
}
