use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(alias = "CALL", alias = "call", alias = "up", alias = "BUY")]
    Up,
    #[serde(alias = "PUT", alias = "put", alias = "down", alias = "SELL")]
    Down,
}

impl Direction {
    /// Contract type understood by the counterparty.
    pub fn contract_type(&self) -> &'static str {
        match self {
            Self::Up => "CALL",
            Self::Down => "PUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.contract_type())
    }
}

/// Lifecycle of a signal inside the dispatcher.
///
/// `New -> Admitted -> Executing -> Open -> Settled`, with `Rejected` and
/// `Failed` as terminal side exits. No state is ever revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalStatus {
    New,
    Admitted,
    Executing,
    Open,
    Settled,
    Rejected,
    Failed,
}

impl SignalStatus {
    pub fn can_transition_to(self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        matches!(
            (self, next),
            (New, Admitted)
                | (New, Rejected)
                // queue expiry while waiting on the rate window
                | (Admitted, Rejected)
                | (Admitted, Executing)
                | (Admitted, Failed)
                | (Executing, Open)
                | (Executing, Failed)
                | (Open, Settled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Rejected | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Admitted => "admitted",
            Self::Executing => "executing",
            Self::Open => "open",
            Self::Settled => "settled",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("illegal transition {from:?} -> {to:?} for signal {signal_id}")]
pub struct TransitionError {
    pub signal_id: Uuid,
    pub from: SignalStatus,
    pub to: SignalStatus,
}

/// What a producer emits: a candidate without identity or stake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDraft {
    pub provider: String,
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
}

impl SignalDraft {
    pub fn new(
        provider: impl Into<String>,
        symbol: impl Into<String>,
        direction: Direction,
        confidence: f64,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            symbol: symbol.into(),
            direction,
            confidence: confidence.clamp(0.0, 1.0),
            strategy: strategy.into(),
            created_at: Utc::now(),
        }
    }

    pub fn dedup_key(&self) -> (&str, Direction) {
        (self.symbol.as_str(), self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub provider: String,
    pub symbol: String,
    pub direction: Direction,
    pub confidence: f64,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    status: SignalStatus,
    stake: Option<f64>,
}

impl Signal {
    /// Gives the draft its identity. Called by the dispatcher when the signal
    /// is broadcast, never by producers.
    pub fn from_draft(draft: SignalDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: draft.provider,
            symbol: draft.symbol,
            direction: draft.direction,
            confidence: draft.confidence,
            strategy: draft.strategy,
            created_at: draft.created_at,
            status: SignalStatus::New,
            stake: None,
        }
    }

    pub fn status(&self) -> SignalStatus {
        self.status
    }

    /// Stake fixed at admission; `None` until then.
    pub fn stake(&self) -> Option<f64> {
        self.stake
    }

    pub fn transition(&mut self, next: SignalStatus) -> Result<SignalStatus, TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                signal_id: self.id,
                from: self.status,
                to: next,
            });
        }
        let previous = self.status;
        self.status = next;
        Ok(previous)
    }

    pub fn admit(&mut self, stake: f64) -> Result<(), TransitionError> {
        self.transition(SignalStatus::Admitted)?;
        self.stake = Some(stake);
        Ok(())
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal() -> Signal {
        Signal::from_draft(SignalDraft::new("feed", "R_50", Direction::Up, 0.8, "trend"))
    }

    #[test]
    fn happy_path_walks_every_state_once() {
        let mut s = signal();
        s.admit(12.5).unwrap();
        assert_eq!(s.stake(), Some(12.5));
        s.transition(SignalStatus::Executing).unwrap();
        s.transition(SignalStatus::Open).unwrap();
        s.transition(SignalStatus::Settled).unwrap();
        assert!(s.status().is_terminal());
        assert!(s.transition(SignalStatus::Open).is_err());
    }

    #[test]
    fn rejected_only_before_execution() {
        let mut s = signal();
        s.transition(SignalStatus::Rejected).unwrap();
        assert!(s.admit(1.0).is_err());

        let mut s = signal();
        s.admit(1.0).unwrap();
        s.transition(SignalStatus::Executing).unwrap();
        let err = s.transition(SignalStatus::Rejected).unwrap_err();
        assert_eq!(err.from, SignalStatus::Executing);
    }

    #[test]
    fn new_signal_cannot_fail_or_open() {
        let mut s = signal();
        assert!(s.transition(SignalStatus::Failed).is_err());
        assert!(s.transition(SignalStatus::Open).is_err());
        assert_eq!(s.status(), SignalStatus::New);
        assert_eq!(s.stake(), None);
    }

    #[test]
    fn draft_confidence_is_clamped() {
        let d = SignalDraft::new("feed", "EURUSD", Direction::Down, 1.7, "x");
        assert_eq!(d.confidence, 1.0);
    }

    #[test]
    fn direction_accepts_call_put_aliases() {
        let d: Direction = serde_json::from_str("\"CALL\"").unwrap();
        assert_eq!(d, Direction::Up);
        let d: Direction = serde_json::from_str("\"put\"").unwrap();
        assert_eq!(d, Direction::Down);
    }
}
