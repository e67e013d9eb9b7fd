use std::sync::Arc;

use async_trait::async_trait;
use common::models::{Outcome, Position, Signal};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::counterparty::{ContractLookup, CounterpartyError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("contract {0} has not settled yet")]
    Pending(String),
    #[error("outcome source unavailable: {0}")]
    Unavailable(String),
}

/// Decides how a position ended. Called once the position's duration has
/// elapsed; an error is retried by the settlement monitor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutcomeOracle: Send + Sync {
    async fn resolve(&self, signal: &Signal, position: &Position) -> Result<Outcome, OracleError>;
}

/// Derives the outcome from the signal's own confidence: a win when
/// `0.95 * confidence > 0.65`.
///
/// This is not market data. It exists so the pipeline runs end to end on
/// paper and must be swapped for [`CounterpartyOracle`] when trading real
/// contracts.
#[derive(Debug, Clone, Copy)]
pub struct ConfidencePolicyOracle {
    pub scale: f64,
    pub threshold: f64,
}

impl Default for ConfidencePolicyOracle {
    fn default() -> Self {
        Self {
            scale: 0.95,
            threshold: 0.65,
        }
    }
}

#[async_trait]
impl OutcomeOracle for ConfidencePolicyOracle {
    async fn resolve(&self, signal: &Signal, _position: &Position) -> Result<Outcome, OracleError> {
        if signal.confidence * self.scale > self.threshold {
            Ok(Outcome::Win)
        } else {
            Ok(Outcome::Loss)
        }
    }
}

/// Asks the counterparty how the contract ended.
pub struct CounterpartyOracle {
    lookup: Arc<Mutex<Box<dyn ContractLookup>>>,
}

impl CounterpartyOracle {
    pub fn new<L: ContractLookup + 'static>(lookup: L) -> Self {
        Self {
            lookup: Arc::new(Mutex::new(Box::new(lookup))),
        }
    }
}

#[async_trait]
impl OutcomeOracle for CounterpartyOracle {
    async fn resolve(&self, _signal: &Signal, position: &Position) -> Result<Outcome, OracleError> {
        let mut lookup = self.lookup.lock().await;
        match lookup.contract_outcome(&position.contract_id).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Err(OracleError::Pending(position.contract_id.clone())),
            Err(CounterpartyError::Rejected { code, message }) => {
                Err(OracleError::Unavailable(format!("{code}: {message}")))
            }
            Err(e) => Err(OracleError::Unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::models::{Direction, SignalDraft};
    use std::collections::VecDeque;

    fn signal(confidence: f64) -> Signal {
        Signal::from_draft(SignalDraft::new("feed", "R_10", Direction::Up, confidence, "t"))
    }

    fn position() -> Position {
        Position {
            signal_id: uuid::Uuid::new_v4(),
            contract_id: "42".to_string(),
            symbol: "R_10".to_string(),
            direction: Direction::Up,
            stake: 10.0,
            opened_at: Utc::now(),
            duration_secs: 1,
        }
    }

    #[tokio::test]
    async fn confidence_policy_threshold() {
        let oracle = ConfidencePolicyOracle::default();
        // 0.95 * 0.7 = 0.665
        assert_eq!(oracle.resolve(&signal(0.7), &position()).await, Ok(Outcome::Win));
        // 0.95 * 0.68 = 0.646
        assert_eq!(oracle.resolve(&signal(0.68), &position()).await, Ok(Outcome::Loss));
    }

    struct Scripted(VecDeque<Result<Option<Outcome>, CounterpartyError>>);

    #[async_trait]
    impl ContractLookup for Scripted {
        async fn contract_outcome(&mut self, _id: &str) -> Result<Option<Outcome>, CounterpartyError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    #[tokio::test]
    async fn counterparty_oracle_maps_lookup_results() {
        let oracle = CounterpartyOracle::new(Scripted(VecDeque::from(vec![
            Ok(None),
            Err(CounterpartyError::Transport("down".to_string())),
            Ok(Some(Outcome::Loss)),
        ])));
        let (s, p) = (signal(0.9), position());
        assert_eq!(oracle.resolve(&s, &p).await, Err(OracleError::Pending("42".to_string())));
        assert!(matches!(oracle.resolve(&s, &p).await, Err(OracleError::Unavailable(_))));
        assert_eq!(oracle.resolve(&s, &p).await, Ok(Outcome::Loss));
    }
}
