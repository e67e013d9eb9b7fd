pub mod account;
pub mod admission;
pub mod counterparty;
pub mod cycle;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod journal;
pub mod oracle;
pub mod query;
pub mod rate_limit;
pub mod registry;
pub mod settlement;

pub use account::{AccountBook, SettlementApplied};
pub use admission::{AdmissionController, Decision};
pub use cycle::TradingCycle;
pub use engine::Engine;
pub use error::{AccountError, EngineError};
pub use executor::{ExecutionError, Executor, ProtocolStep};
pub use oracle::{ConfidencePolicyOracle, CounterpartyOracle, OracleError, OutcomeOracle};
pub use query::QueryService;
pub use registry::{SubscriberRegistry, Subscription};
pub use settlement::{SettlementError, SettlementMonitor};
