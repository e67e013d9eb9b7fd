use dotenvy::dotenv;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use anyhow::{Context, bail};
use common::actors::ActorType;
use common::config::{CounterpartyKind, EngineConfig, OracleKind};
use common::logger;
use common::sink::PersistenceSink;
use dispatch::counterparty::{Connection, DerivConnection, PaperCounterparty, connection};
use dispatch::{ConfidencePolicyOracle, CounterpartyOracle, Engine, OutcomeOracle, TradingCycle};
use producers::ProducerPool;
use producers::remote::http_fetcher::HttpFetcher;
use producers::sources::load_sources;
use storage::StorageWriter;

use crate::actors::supervisor::Supervisor;
use crate::services::status_reporter::StatusReporter;
use crate::services::telegram_control::TelegramControl;
use crate::services::telegram_service::TelegramReporter;

mod actors;
mod services;

const STATUS_EVERY: Duration = Duration::from_secs(60);
const STORAGE_QUEUE: usize = 4096;

async fn open_counterparty(cfg: &EngineConfig) -> anyhow::Result<(Vec<Connection>, f64)> {
    match cfg.counterparty {
        CounterpartyKind::Paper => {
            info!(
                "Paper trading on {} simulated connections",
                cfg.execution.connections
            );
            let connections = (0..cfg.execution.connections)
                .map(|_| connection(PaperCounterparty::new(cfg.settlement.payout_factor)))
                .collect();
            Ok((connections, cfg.account.initial_balance))
        }
        CounterpartyKind::Deriv => {
            let token = cfg.deriv_token.as_deref().context("DERIV_TOKEN is not set")?;
            let mut connections = Vec::with_capacity(cfg.execution.connections);
            let mut balance = cfg.account.initial_balance;
            for i in 0..cfg.execution.connections {
                let (conn, reported) = DerivConnection::connect(&cfg.deriv_ws_url, token).await?;
                if i == 0 {
                    balance = reported;
                }
                connections.push(connection(conn));
            }
            Ok((connections, balance))
        }
    }
}

async fn build_oracle(cfg: &EngineConfig) -> anyhow::Result<Arc<dyn OutcomeOracle>> {
    match cfg.oracle {
        OracleKind::Placeholder => {
            warn!("Outcomes come from the confidence placeholder, not from the market");
            Ok(Arc::new(ConfidencePolicyOracle::default()))
        }
        OracleKind::Counterparty => {
            if cfg.counterparty != CounterpartyKind::Deriv {
                bail!("ORACLE=counterparty requires COUNTERPARTY=deriv");
            }
            let token = cfg.deriv_token.as_deref().context("DERIV_TOKEN is not set")?;
            let (lookup, _) = DerivConnection::connect(&cfg.deriv_ws_url, token).await?;
            Ok(Arc::new(CounterpartyOracle::new(lookup)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logger::setup_logger();
    debug!("System starting up...");

    let cfg = EngineConfig::from_env()?;
    info!("Engine profile: {:?}", cfg.profile);
    if !cfg.account.auto_trade {
        warn!("Starting with auto trading disabled");
    }

    let producers = load_sources(&cfg.scan.sources_path)?;
    if producers.is_empty() {
        warn!("No active signal sources in {}", cfg.scan.sources_path);
    }
    let pool = Arc::new(ProducerPool::new(
        Arc::new(HttpFetcher::new()?),
        producers,
        cfg.scan.source_concurrency,
    ));

    let db = storage::db::connect(&cfg.database_path).await?;
    let (sink, writer) = StorageWriter::channel(db, STORAGE_QUEUE);
    let storage_token = CancellationToken::new();
    let writer_handle = tokio::spawn(writer.run(storage_token.clone()));
    let sink: Arc<dyn PersistenceSink> = Arc::new(sink);

    let (connections, balance) = open_counterparty(&cfg).await?;
    let oracle = build_oracle(&cfg).await?;

    let engine = Engine::new(&cfg, balance, connections, oracle, sink);
    let book = engine.book();
    let batches = engine.batch_sender();

    let mut supervisor = Supervisor::new();

    let scan_cfg = cfg.scan.clone();
    supervisor.register_actor(
        ActorType::TradingCycle,
        Box::new(move || {
            Box::new(TradingCycle::new(
                pool.clone(),
                book.clone(),
                batches.clone(),
                scan_cfg.clone(),
            ))
        }),
    );

    let query = engine.query();
    supervisor.register_actor(
        ActorType::StatusReporter,
        Box::new(move || Box::new(StatusReporter::new(query.clone(), STATUS_EVERY))),
    );

    match (cfg.telegram_token.clone(), cfg.telegram_chat_id) {
        (Some(token), Some(chat_id)) => {
            let registry = engine.registry();
            let report_token = token.clone();
            supervisor.register_actor(
                ActorType::DailyReporter,
                Box::new(move || {
                    Box::new(TelegramReporter::new(&report_token, chat_id, registry.clone()))
                }),
            );
            let book = engine.book();
            supervisor.register_actor(
                ActorType::TradingControl,
                Box::new(move || Box::new(TelegramControl::new(&token, chat_id, book.clone()))),
            );
        }
        _ => info!("Telegram not configured; daily reports go to the log only"),
    }

    let shutdown = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.run(shutdown.clone()));

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        ctrl_c_token.cancel();
    });

    // Any engine exit stops the actors.
    let supervisor_token = shutdown.clone();
    let supervisor_handle = tokio::spawn(async move { supervisor.start(supervisor_token).await });

    let engine_result = engine_handle.await;
    shutdown.cancel();
    supervisor_handle.await.ok();

    storage_token.cancel();
    writer_handle.await.ok();

    match engine_result {
        Ok(Ok(())) => {
            info!("Shut down cleanly");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(anyhow::anyhow!("engine task failed: {e}")),
    }
}
