use async_trait::async_trait;
use common::actors::{Actor, ActorType, ControlMessage};
use common::models::{AccountSnapshot, DailySummary, TradeEvent};
use dispatch::SubscriberRegistry;
use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Sends the closing report of each trading day, and every escalated
/// settlement, to a Telegram chat.
pub struct TelegramReporter {
    id: Uuid,
    bot: Bot,
    chat_id: ChatId,
    registry: SubscriberRegistry,
}

impl TelegramReporter {
    pub fn new(token: &str, chat_id: i64, registry: SubscriberRegistry) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
            registry,
        }
    }

    pub fn daily_report(summary: &DailySummary, account: &AccountSnapshot) -> String {
        format!(
            "Daily report {}\nProfit: {:+.2}\nTrades: {} ({} won, {:.1}%)\nClosing balance: {:.2}\nNew target: {:.2}",
            summary.day,
            summary.daily_profit,
            summary.trades,
            summary.wins,
            summary.win_rate() * 100.0,
            summary.closing_balance,
            account.daily_target,
        )
    }

    fn message_for(event: &TradeEvent) -> Option<String> {
        match event {
            TradeEvent::DailyReset { summary, account } => Some(Self::daily_report(summary, account)),
            TradeEvent::Escalated {
                signal_id,
                contract_id,
                reason,
            } => Some(format!(
                "Settlement needs attention\nContract: {}\nSignal: {}\nReason: {}",
                contract_id, signal_id, reason
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl Actor for TelegramReporter {
    fn name(&self) -> ActorType {
        ActorType::DailyReporter
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        info!("Starting Telegram notification service");
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx.clone());
        let mut events = self.registry.subscribe();

        while let Some(ev) = events.recv().await {
            let Some(msg) = Self::message_for(&ev.event) else {
                continue;
            };
            // Send message and log error if it fails, but don't crash
            if let Err(e) = self.bot.send_message(self.chat_id, msg).await {
                error!("Failed to send Telegram message: {}", e);
                supervisor_tx
                    .send(ControlMessage::Error(self.id, e.to_string()))
                    .await?;
            }
        }

        heartbeat_handle.abort();
        anyhow::bail!("event subscription dropped")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_report_lists_closing_figures() {
        let summary = DailySummary {
            day: "2025-06-01".parse().unwrap(),
            daily_profit: -12.5,
            trades: 4,
            wins: 1,
            closing_balance: 987.5,
        };
        let account = AccountSnapshot {
            trading_day: "2025-06-02".parse().unwrap(),
            current_balance: 987.5,
            daily_profit: 0.0,
            daily_target: 246.9,
            daily_trade_count: 0,
            max_daily_trades: 50,
            last_admission_at: None,
            total_trades: 4,
            winning_trades: 1,
            total_profit: -12.5,
            auto_trade: true,
        };
        let text = TelegramReporter::daily_report(&summary, &account);
        assert!(text.starts_with("Daily report 2025-06-01"));
        assert!(text.contains("Profit: -12.50"));
        assert!(text.contains("Trades: 4 (1 won, 25.0%)"));
        assert!(text.contains("New target: 246.90"));
    }

    #[test]
    fn only_resets_and_escalations_are_sent() {
        let escalated = TradeEvent::Escalated {
            signal_id: Uuid::nil(),
            contract_id: "123".to_string(),
            reason: "feed down".to_string(),
        };
        assert!(TelegramReporter::message_for(&escalated).unwrap().contains("123"));

        let countdown = TradeEvent::Countdown {
            signal_id: Uuid::nil(),
            contract_id: "123".to_string(),
            symbol: "R_50".to_string(),
            remaining_secs: 10,
        };
        assert!(TelegramReporter::message_for(&countdown).is_none());
    }
}
