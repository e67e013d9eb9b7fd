use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use common::config::AccountConfig;
use common::models::{AccountSnapshot, DailySummary, Outcome, Position, Settlement};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AccountError;

/// How many settled positions are remembered for replay detection.
const SETTLED_MEMORY: usize = 4096;

/// Signal ids of recent settlements, oldest evicted first.
#[derive(Debug, Default)]
struct SettledLedger {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl SettledLedger {
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SETTLED_MEMORY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}

/// The account aggregate. Only reachable through [`AccountBook`], whose single
/// lock serializes admissions, settlements and daily resets.
#[derive(Debug)]
pub struct AccountState {
    pub(crate) trading_day: NaiveDate,
    pub(crate) current_balance: f64,
    pub(crate) daily_profit: f64,
    pub(crate) daily_target: f64,
    pub(crate) daily_trade_count: u32,
    pub(crate) max_daily_trades: u32,
    pub(crate) last_admission_at: Option<DateTime<Utc>>,
    pub(crate) auto_trade: bool,
    daily_wins: u32,
    daily_settled: u32,
    total_trades: u64,
    winning_trades: u64,
    total_profit: f64,
    reserved: HashSet<Uuid>,
    open: HashSet<Uuid>,
    settled: SettledLedger,
}

impl AccountState {
    fn new(cfg: &AccountConfig, balance: f64, day: NaiveDate) -> Self {
        Self {
            trading_day: day,
            current_balance: balance,
            daily_profit: 0.0,
            daily_target: balance * cfg.daily_target_pct,
            daily_trade_count: 0,
            max_daily_trades: cfg.max_daily_trades,
            last_admission_at: None,
            auto_trade: cfg.auto_trade,
            daily_wins: 0,
            daily_settled: 0,
            total_trades: 0,
            winning_trades: 0,
            total_profit: 0.0,
            reserved: HashSet::new(),
            open: HashSet::new(),
            settled: SettledLedger::default(),
        }
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            trading_day: self.trading_day,
            current_balance: self.current_balance,
            daily_profit: self.daily_profit,
            daily_target: self.daily_target,
            daily_trade_count: self.daily_trade_count,
            max_daily_trades: self.max_daily_trades,
            last_admission_at: self.last_admission_at,
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            total_profit: self.total_profit,
            auto_trade: self.auto_trade,
        }
    }

    /// Takes one unit of today's trade budget for `signal_id`.
    pub(crate) fn reserve(&mut self, signal_id: Uuid, at: DateTime<Utc>) -> Result<(), AccountError> {
        self.daily_trade_count += 1;
        self.last_admission_at = Some(at);
        self.reserved.insert(signal_id);
        self.check_invariants()
    }

    pub(crate) fn check_invariants(&self) -> Result<(), AccountError> {
        if self.daily_trade_count > self.max_daily_trades {
            return Err(AccountError::InvariantViolation(format!(
                "daily trade count {} exceeds maximum {}",
                self.daily_trade_count, self.max_daily_trades
            )));
        }
        for (name, value) in [
            ("balance", self.current_balance),
            ("daily profit", self.daily_profit),
            ("daily target", self.daily_target),
        ] {
            if !value.is_finite() {
                return Err(AccountError::InvariantViolation(format!("{name} is {value}")));
            }
        }
        if self.winning_trades > self.total_trades {
            return Err(AccountError::InvariantViolation(format!(
                "{} wins out of {} trades",
                self.winning_trades, self.total_trades
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementApplied {
    Applied {
        settlement: Settlement,
        account: AccountSnapshot,
    },
    /// The position was settled before; nothing changed.
    Duplicate,
}

pub struct AccountBook {
    state: Mutex<AccountState>,
    target_pct: f64,
    rebase_target_on_settlement: bool,
}

impl AccountBook {
    pub fn new(cfg: &AccountConfig, initial_balance: f64, day: NaiveDate) -> Self {
        info!(
            "Account opened with balance {:.2}, daily target {:.2} ({:.0}%)",
            initial_balance,
            initial_balance * cfg.daily_target_pct,
            cfg.daily_target_pct * 100.0
        );
        Self {
            state: Mutex::new(AccountState::new(cfg, initial_balance, day)),
            target_pct: cfg.daily_target_pct,
            rebase_target_on_settlement: cfg.rebase_target_on_settlement,
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, AccountState> {
        self.state.lock().await
    }

    pub async fn snapshot(&self) -> AccountSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn set_auto_trade(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if state.auto_trade != enabled {
            info!("Auto trading {}", if enabled { "enabled" } else { "disabled" });
        }
        state.auto_trade = enabled;
    }

    /// Slots taken today by signals that have not opened a position yet.
    pub async fn reserved_count(&self) -> usize {
        self.state.lock().await.reserved.len()
    }

    /// Positions live at the counterparty and not yet settled.
    pub async fn open_positions(&self) -> usize {
        self.state.lock().await.open.len()
    }

    /// Moves a signal's reservation to a live position.
    pub async fn mark_open(&self, signal_id: Uuid) {
        let mut state = self.state.lock().await;
        state.reserved.remove(&signal_id);
        state.open.insert(signal_id);
    }

    /// Keeps the slot counted against today's budget but stops tracking it as
    /// returnable. Used when a contract may exist without confirmation.
    pub async fn forfeit_reservation(&self, signal_id: Uuid) {
        self.state.lock().await.reserved.remove(&signal_id);
    }

    /// Hands back the trade slot reserved for a signal that never opened a
    /// position. Slots reserved on a previous trading day are not returned.
    pub async fn release_reservation(&self, signal_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        if state.reserved.remove(&signal_id) {
            state.daily_trade_count = state.daily_trade_count.saturating_sub(1);
            true
        } else {
            false
        }
    }

    /// Applies a resolved outcome exactly once per position.
    pub async fn apply_settlement(
        &self,
        position: &Position,
        outcome: Outcome,
        payout_factor: f64,
    ) -> Result<SettlementApplied, AccountError> {
        let mut state = self.state.lock().await;
        if !state.settled.insert(position.signal_id) {
            warn!(
                "Settlement for {} already applied, ignoring replay",
                position.contract_id
            );
            return Ok(SettlementApplied::Duplicate);
        }

        let profit = Settlement::profit_for(outcome, position.stake, payout_factor);
        state.current_balance += profit;
        state.daily_profit += profit;
        state.total_profit += profit;
        state.total_trades += 1;
        state.daily_settled += 1;
        if outcome == Outcome::Win {
            state.winning_trades += 1;
            state.daily_wins += 1;
        }
        state.reserved.remove(&position.signal_id);
        state.open.remove(&position.signal_id);
        if self.rebase_target_on_settlement {
            state.daily_target = state.current_balance * self.target_pct;
        }
        state.check_invariants()?;

        Ok(SettlementApplied::Applied {
            settlement: Settlement {
                signal_id: position.signal_id,
                contract_id: position.contract_id.clone(),
                outcome,
                profit,
                balance_after: state.current_balance,
                settled_at: Utc::now(),
            },
            account: state.snapshot(),
        })
    }

    /// Starts a new trading day if `today` differs from the current one,
    /// returning the closing summary of the day that ended.
    pub async fn roll_day(&self, today: NaiveDate) -> Result<Option<DailySummary>, AccountError> {
        let mut state = self.state.lock().await;
        if state.trading_day == today {
            return Ok(None);
        }

        let summary = DailySummary {
            day: state.trading_day,
            daily_profit: state.daily_profit,
            trades: state.daily_settled,
            wins: state.daily_wins,
            closing_balance: state.current_balance,
        };

        state.trading_day = today;
        state.daily_profit = 0.0;
        state.daily_trade_count = 0;
        state.daily_wins = 0;
        state.daily_settled = 0;
        state.reserved.clear();
        state.daily_target = state.current_balance * self.target_pct;
        state.check_invariants()?;

        info!(
            "Daily reset for {}: new target {:.2}, yesterday closed at {:+.2}",
            today, state.daily_target, summary.daily_profit
        );
        Ok(Some(summary))
    }
}
