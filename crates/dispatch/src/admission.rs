use std::sync::Arc;

use chrono::Utc;
use common::config::StakePolicy;
use common::models::{RejectReason, Signal};
use tracing::debug;

use crate::account::{AccountBook, AccountState};
use crate::error::AccountError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub admit: bool,
    pub stake: f64,
    pub reason: Option<RejectReason>,
}

impl Decision {
    fn reject(reason: RejectReason) -> Self {
        Self {
            admit: false,
            stake: 0.0,
            reason: Some(reason),
        }
    }
}

/// Stake for a signal of the given confidence against the account figures
/// at decision time. Rounded to cents and never above `balance * risk_fraction`.
pub fn size_stake(
    policy: &StakePolicy,
    confidence: f64,
    balance: f64,
    daily_profit: f64,
    daily_target: f64,
) -> f64 {
    let mut base = policy
        .base_stake
        .max(daily_target * policy.target_base_fraction);

    if daily_profit > 0.0 && daily_target > 0.0 {
        let progress = (daily_profit / daily_target).max(policy.progress_floor);
        let multiplier =
            (policy.progress_offset + progress * policy.progress_gain).min(policy.multiplier_cap);
        base *= multiplier;
    }

    let raw = base * (policy.confidence_floor + confidence * policy.confidence_gain);
    let rounded = (raw * 100.0).round() / 100.0;
    let cap = (balance * policy.risk_fraction).max(0.0);
    rounded.clamp(0.0, cap)
}

/// Decides per signal whether to commit budget and how much.
pub struct AdmissionController {
    book: Arc<AccountBook>,
    policy: StakePolicy,
    min_confidence: f64,
}

impl AdmissionController {
    pub fn new(book: Arc<AccountBook>, policy: StakePolicy, min_confidence: f64) -> Self {
        Self {
            book,
            policy,
            min_confidence,
        }
    }

    /// Checks the signal against the account and, on admission, reserves
    /// one trade slot under the same lock as the check. A rejection leaves
    /// the account untouched.
    pub async fn decide(&self, signal: &Signal) -> Result<Decision, AccountError> {
        let mut state = self.book.lock().await;
        let decision = self.evaluate(&state, signal.confidence);

        if decision.admit {
            state.reserve(signal.id, Utc::now())?;
            debug!(
                "Admitted {} {} {} at {:.2} ({}/{} today)",
                signal.short_id(),
                signal.symbol,
                signal.direction,
                decision.stake,
                state.daily_trade_count,
                state.max_daily_trades
            );
        }
        Ok(decision)
    }

    fn evaluate(&self, state: &AccountState, confidence: f64) -> Decision {
        if !state.auto_trade {
            return Decision::reject(RejectReason::AutoTradeDisabled);
        }
        if confidence < self.min_confidence {
            return Decision::reject(RejectReason::LowConfidence);
        }
        if state.daily_trade_count >= state.max_daily_trades {
            return Decision::reject(RejectReason::DailyTradeLimit);
        }
        if state.daily_profit >= state.daily_target {
            return Decision::reject(RejectReason::DailyTargetReached);
        }

        let stake = size_stake(
            &self.policy,
            confidence,
            state.current_balance,
            state.daily_profit,
            state.daily_target,
        );
        if stake <= 0.0 {
            return Decision::reject(RejectReason::ZeroStake);
        }

        Decision {
            admit: true,
            stake,
            reason: None,
        }
    }
}
