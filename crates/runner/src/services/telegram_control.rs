use std::sync::Arc;

use async_trait::async_trait;
use common::actors::{Actor, ActorType, ControlMessage};
use dispatch::AccountBook;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::status_reporter::StatusReporter;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Trading controls:")]
pub enum Command {
    #[command(description = "stop admitting new signals")]
    Pause,
    #[command(description = "admit signals again")]
    Resume,
    #[command(description = "show the account")]
    Status,
}

/// Applies chat commands to the running account.
pub struct Control {
    book: Arc<AccountBook>,
    chat_id: ChatId,
}

impl Control {
    pub async fn apply(&self, cmd: Command) -> String {
        match cmd {
            Command::Pause => {
                self.book.set_auto_trade(false).await;
                "Auto trading paused. Open positions still settle.".to_string()
            }
            Command::Resume => {
                self.book.set_auto_trade(true).await;
                "Auto trading resumed.".to_string()
            }
            Command::Status => {
                let account = self.book.snapshot().await;
                StatusReporter::status_line(&account, self.book.open_positions().await)
            }
        }
    }
}

async fn answer(bot: Bot, msg: Message, cmd: Command, control: Arc<Control>) -> ResponseResult<()> {
    if msg.chat.id != control.chat_id {
        warn!("Ignoring {:?} from unknown chat {}", cmd, msg.chat.id);
        return Ok(());
    }
    info!("Telegram command {:?}", cmd);
    let reply = control.apply(cmd).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Listens for /pause, /resume and /status in the configured chat.
pub struct TelegramControl {
    id: Uuid,
    bot: Bot,
    control: Arc<Control>,
}

impl TelegramControl {
    pub fn new(token: &str, chat_id: i64, book: Arc<AccountBook>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot: Bot::new(token),
            control: Arc::new(Control {
                book,
                chat_id: ChatId(chat_id),
            }),
        }
    }
}

#[async_trait]
impl Actor for TelegramControl {
    fn name(&self) -> ActorType {
        ActorType::TradingControl
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        info!("Listening for Telegram commands");
        let heartbeat_handle = self.spawn_heartbeat(supervisor_tx);

        let handler = Update::filter_message()
            .filter_command::<Command>()
            .endpoint(answer);
        Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![self.control.clone()])
            .default_handler(|_| async {})
            .build()
            .dispatch()
            .await;

        heartbeat_handle.abort();
        anyhow::bail!("command dispatcher stopped")
    }
}
