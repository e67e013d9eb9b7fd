use std::sync::Arc;

use async_trait::async_trait;
use common::models::{Direction, Outcome};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

pub mod deriv;
pub mod paper;

pub use deriv::DerivConnection;
pub use paper::PaperCounterparty;

/// Terms asked for in the first protocol step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermsRequest {
    pub symbol: String,
    pub direction: Direction,
    pub stake: f64,
    pub duration: u32,
    pub duration_unit: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub id: String,
    pub ask_price: f64,
    pub payout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub contract_id: String,
    pub buy_price: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CounterpartyError {
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// One connection to the counterparty. Callers serialize access, so an
/// implementation only ever runs one exchange at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Counterparty: Send {
    async fn request_terms(&mut self, request: &TermsRequest) -> Result<Quote, CounterpartyError>;

    async fn accept(&mut self, quote: &Quote, price: f64) -> Result<Contract, CounterpartyError>;
}

/// Settlement status lookup for contracts opened earlier.
#[async_trait]
pub trait ContractLookup: Send {
    /// `None` while the contract is still running.
    async fn contract_outcome(&mut self, contract_id: &str) -> Result<Option<Outcome>, CounterpartyError>;
}

pub type Connection = Arc<Mutex<Box<dyn Counterparty>>>;

pub fn connection<C: Counterparty + 'static>(counterparty: C) -> Connection {
    Arc::new(Mutex::new(Box::new(counterparty)))
}
