use std::sync::Arc;

use chrono::Local;
use common::config::EngineConfig;
use common::models::SignalDraft;
use common::sink::PersistenceSink;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::account::AccountBook;
use crate::admission::AdmissionController;
use crate::counterparty::Connection;
use crate::dispatcher::{Dispatcher, TradeContext};
use crate::error::EngineError;
use crate::executor::Executor;
use crate::journal::Journal;
use crate::oracle::OutcomeOracle;
use crate::query::QueryService;
use crate::registry::{SubscriberRegistry, Subscription};
use crate::settlement::SettlementMonitor;

const SUBSCRIBER_QUEUE: usize = 256;
const EVENT_HISTORY: usize = 500;
const BATCH_QUEUE: usize = 16;

/// Wires the account, admission, dispatcher, executor and settlement
/// monitor around one subscriber registry.
pub struct Engine {
    book: Arc<AccountBook>,
    registry: SubscriberRegistry,
    dispatcher: Dispatcher,
    batch_tx: mpsc::Sender<Vec<SignalDraft>>,
    batch_rx: mpsc::Receiver<Vec<SignalDraft>>,
}

impl Engine {
    pub fn new(
        cfg: &EngineConfig,
        initial_balance: f64,
        connections: Vec<Connection>,
        oracle: Arc<dyn OutcomeOracle>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        let book = Arc::new(AccountBook::new(
            &cfg.account,
            initial_balance,
            Local::now().date_naive(),
        ));
        let registry = SubscriberRegistry::new(SUBSCRIBER_QUEUE, EVENT_HISTORY);
        let journal = Journal::new(registry.clone(), sink);

        let admission =
            AdmissionController::new(book.clone(), cfg.stake.clone(), cfg.account.min_confidence);
        let executor = Executor::new(
            connections,
            cfg.execution.clone(),
            cfg.settlement.position_duration,
        );
        let settlement = SettlementMonitor::new(
            book.clone(),
            oracle,
            journal.clone(),
            cfg.settlement.clone(),
        );
        let ctx = TradeContext {
            book: book.clone(),
            executor: Arc::new(executor),
            settlement: Arc::new(settlement),
            journal,
        };

        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE);
        Self {
            book,
            registry,
            dispatcher: Dispatcher::new(admission, ctx, cfg.dispatch.clone()),
            batch_tx,
            batch_rx,
        }
    }

    pub fn book(&self) -> Arc<AccountBook> {
        self.book.clone()
    }

    pub fn registry(&self) -> SubscriberRegistry {
        self.registry.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.registry.subscribe()
    }

    pub fn query(&self) -> QueryService {
        QueryService::new(self.book.clone(), self.registry.clone())
    }

    /// Input side of the dispatcher. The engine stops on its own once every
    /// sender is dropped and all work has drained.
    pub fn batch_sender(&self) -> mpsc::Sender<Vec<SignalDraft>> {
        self.batch_tx.clone()
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), EngineError> {
        let Engine {
            dispatcher,
            batch_tx,
            batch_rx,
            ..
        } = self;
        drop(batch_tx);
        dispatcher.run(batch_rx, shutdown).await
    }
}
