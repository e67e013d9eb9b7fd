use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Direction;

/// A live exposure opened at the counterparty for one admitted signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub signal_id: Uuid,
    pub contract_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub stake: f64,
    pub opened_at: DateTime<Utc>,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Loss => "loss",
        }
    }
}

/// Terminal record of a settled position. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub signal_id: Uuid,
    pub contract_id: String,
    pub outcome: Outcome,
    pub profit: f64,
    pub balance_after: f64,
    pub settled_at: DateTime<Utc>,
}

impl Settlement {
    /// `stake * payout` on a win, the whole stake lost otherwise.
    pub fn profit_for(outcome: Outcome, stake: f64, payout_factor: f64) -> f64 {
        match outcome {
            Outcome::Win => stake * payout_factor,
            Outcome::Loss => -stake,
        }
    }
}
