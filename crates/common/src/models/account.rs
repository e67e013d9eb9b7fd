use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Read-only copy of the account aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub trading_day: NaiveDate,
    pub current_balance: f64,
    pub daily_profit: f64,
    pub daily_target: f64,
    pub daily_trade_count: u32,
    pub max_daily_trades: u32,
    pub last_admission_at: Option<DateTime<Utc>>,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub total_profit: f64,
    pub auto_trade: bool,
}

impl AccountSnapshot {
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.winning_trades as f64 / self.total_trades as f64
        }
    }

    /// Progress toward the daily target, in percent.
    pub fn target_progress_pct(&self) -> f64 {
        if self.daily_target > 0.0 {
            self.daily_profit / self.daily_target * 100.0
        } else {
            0.0
        }
    }
}

/// Closing figures of one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub day: NaiveDate,
    pub daily_profit: f64,
    pub trades: u32,
    pub wins: u32,
    pub closing_balance: f64,
}

impl DailySummary {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_handles_zero_target() {
        let snap = AccountSnapshot {
            trading_day: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            current_balance: 0.0,
            daily_profit: 10.0,
            daily_target: 0.0,
            daily_trade_count: 0,
            max_daily_trades: 5,
            last_admission_at: None,
            total_trades: 4,
            winning_trades: 3,
            total_profit: 10.0,
            auto_trade: true,
        };
        assert_eq!(snap.target_progress_pct(), 0.0);
        assert_eq!(snap.win_rate(), 0.75);
    }
}
