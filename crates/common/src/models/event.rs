use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AccountSnapshot, DailySummary, Position, Settlement, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    LowConfidence,
    DailyTradeLimit,
    DailyTargetReached,
    AutoTradeDisabled,
    ZeroStake,
    QueueExpired,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LowConfidence => "confidence below threshold",
            Self::DailyTradeLimit => "daily trade limit reached",
            Self::DailyTargetReached => "daily target reached",
            Self::AutoTradeDisabled => "auto trading disabled",
            Self::ZeroStake => "stake sized to zero",
            Self::QueueExpired => "expired waiting for rate window",
        };
        f.write_str(s)
    }
}

/// Everything the engine broadcasts. Signal-carrying variants hold a
/// snapshot taken right after the transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeEvent {
    Received {
        signal: Signal,
    },
    Admitted {
        signal: Signal,
    },
    Rejected {
        signal: Signal,
        reason: RejectReason,
    },
    Executing {
        signal: Signal,
    },
    Opened {
        signal: Signal,
        position: Position,
    },
    Failed {
        signal: Signal,
        error: String,
    },
    Countdown {
        signal_id: Uuid,
        contract_id: String,
        symbol: String,
        remaining_secs: u64,
    },
    Settled {
        signal: Signal,
        settlement: Settlement,
        account: AccountSnapshot,
    },
    Escalated {
        signal_id: Uuid,
        contract_id: String,
        reason: String,
    },
    DailyReset {
        summary: DailySummary,
        account: AccountSnapshot,
    },
}

impl TradeEvent {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            Self::Received { signal }
            | Self::Admitted { signal }
            | Self::Rejected { signal, .. }
            | Self::Executing { signal }
            | Self::Opened { signal, .. }
            | Self::Failed { signal, .. }
            | Self::Settled { signal, .. } => Some(signal),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Received { .. } => "received",
            Self::Admitted { .. } => "admitted",
            Self::Rejected { .. } => "rejected",
            Self::Executing { .. } => "executing",
            Self::Opened { .. } => "opened",
            Self::Failed { .. } => "failed",
            Self::Countdown { .. } => "countdown",
            Self::Settled { .. } => "settled",
            Self::Escalated { .. } => "escalated",
            Self::DailyReset { .. } => "daily_reset",
        }
    }
}

/// A published event stamped with its registry sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: TradeEvent,
}
