use std::time::Duration;

use async_trait::async_trait;
use common::actors::{Actor, ActorType, ControlMessage};
use common::models::AccountSnapshot;
use dispatch::QueryService;
use tokio::{sync::mpsc, time};
use tracing::info;
use uuid::Uuid;

/// Logs a one-line account status at a fixed cadence.
pub struct StatusReporter {
    id: Uuid,
    query: QueryService,
    every: Duration,
}

impl StatusReporter {
    pub fn new(query: QueryService, every: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            query,
            every,
        }
    }

    pub(crate) fn status_line(account: &AccountSnapshot, open: usize) -> String {
        format!(
            "balance {:.2} | today {:+.2} of {:.2} ({:.0}%) | trades {}/{} | open {} | win rate {:.1}% over {}{}",
            account.current_balance,
            account.daily_profit,
            account.daily_target,
            account.target_progress_pct(),
            account.daily_trade_count,
            account.max_daily_trades,
            open,
            account.win_rate() * 100.0,
            account.total_trades,
            if account.auto_trade { "" } else { " | auto trading OFF" },
        )
    }
}

#[async_trait]
impl Actor for StatusReporter {
    fn name(&self) -> ActorType {
        ActorType::StatusReporter
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let _heartbeat = self.spawn_heartbeat(supervisor_tx);
        let mut ticker = time::interval(self.every);
        loop {
            ticker.tick().await;
            let account = self.query.account().await;
            let open = self.query.open_positions().await;
            info!("{}", Self::status_line(&account, open));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::AccountSnapshot;

    #[test]
    fn status_line_shows_progress_and_toggle() {
        let account = AccountSnapshot {
            trading_day: "2025-06-01".parse().unwrap(),
            current_balance: 1043.5,
            daily_profit: 43.5,
            daily_target: 250.0,
            daily_trade_count: 3,
            max_daily_trades: 50,
            last_admission_at: None,
            total_trades: 4,
            winning_trades: 3,
            total_profit: 43.5,
            auto_trade: false,
        };
        let line = StatusReporter::status_line(&account, 1);
        assert!(line.starts_with("balance 1043.50 | today +43.50 of 250.00 (17%)"));
        assert!(line.contains("trades 3/50 | open 1 | win rate 75.0% over 4"));
        assert!(line.ends_with("auto trading OFF"));
    }
}
