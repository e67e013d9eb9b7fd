use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use common::config::ExecutionConfig;
use common::models::{Position, Signal};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::counterparty::{Connection, CounterpartyError, TermsRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStep {
    RequestTerms,
    Accept,
}

impl fmt::Display for ProtocolStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RequestTerms => "request terms",
            Self::Accept => "accept",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("{step} timed out after {after:?}")]
    Timeout { step: ProtocolStep, after: Duration },
    #[error("{step} rejected ({code}): {message}")]
    Rejected {
        step: ProtocolStep,
        code: String,
        message: String,
    },
    #[error("{step} failed: {message}")]
    Transport { step: ProtocolStep, message: String },
    #[error("signal {0} has no admitted stake")]
    NotAdmitted(Uuid),
    #[error("no counterparty connection configured")]
    NoConnection,
    /// The buy went out but no answer came back; the contract may be live.
    #[error("accept of quote {quote_id} unconfirmed: {reason}")]
    Unconfirmed { quote_id: String, reason: String },
}

impl ExecutionError {
    fn from_counterparty(step: ProtocolStep, err: CounterpartyError) -> Self {
        match err {
            CounterpartyError::Rejected { code, message } => Self::Rejected { step, code, message },
            CounterpartyError::Transport(message) | CounterpartyError::Protocol(message) => {
                Self::Transport { step, message }
            }
        }
    }
}

/// Opens positions through the two-step request/confirm protocol.
///
/// Connections are picked round-robin. A connection stays locked for both
/// steps, so exchanges never interleave on one session.
pub struct Executor {
    connections: Vec<Connection>,
    next: AtomicUsize,
    cfg: ExecutionConfig,
    position_duration: Duration,
}

impl Executor {
    pub fn new(connections: Vec<Connection>, cfg: ExecutionConfig, position_duration: Duration) -> Self {
        Self {
            connections,
            next: AtomicUsize::new(0),
            cfg,
            position_duration,
        }
    }

    pub async fn open(&self, signal: &Signal) -> Result<Position, ExecutionError> {
        let stake = signal.stake().ok_or(ExecutionError::NotAdmitted(signal.id))?;
        if self.connections.is_empty() {
            return Err(ExecutionError::NoConnection);
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let n = self.connections.len();
        let mut guard = None;
        for i in 0..n {
            if let Ok(g) = self.connections[(start + i) % n].try_lock() {
                guard = Some(g);
                break;
            }
        }
        let mut conn = match guard {
            Some(g) => g,
            None => self.connections[start % n].lock().await,
        };

        let request = TermsRequest {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            stake,
            duration: self.cfg.contract_duration,
            duration_unit: self.cfg.contract_duration_unit.clone(),
            currency: self.cfg.currency.clone(),
        };

        let step = ProtocolStep::RequestTerms;
        let quote = timeout(self.cfg.step_timeout, conn.request_terms(&request))
            .await
            .map_err(|_| ExecutionError::Timeout {
                step,
                after: self.cfg.step_timeout,
            })?
            .map_err(|e| ExecutionError::from_counterparty(step, e))?;
        debug!(
            "Quote {} for {}: ask {:.2}, payout {:?}",
            quote.id,
            signal.short_id(),
            quote.ask_price,
            quote.payout
        );

        let step = ProtocolStep::Accept;
        let contract = match timeout(self.cfg.step_timeout, conn.accept(&quote, stake)).await {
            Ok(Ok(contract)) => contract,
            Ok(Err(CounterpartyError::Rejected { code, message })) => {
                return Err(ExecutionError::Rejected { step, code, message });
            }
            Ok(Err(CounterpartyError::Transport(reason) | CounterpartyError::Protocol(reason))) => {
                return Err(ExecutionError::Unconfirmed {
                    quote_id: quote.id,
                    reason,
                });
            }
            Err(_) => {
                return Err(ExecutionError::Unconfirmed {
                    quote_id: quote.id,
                    reason: format!("no answer within {:?}", self.cfg.step_timeout),
                });
            }
        };
        drop(conn);

        info!(
            "Opened {} {} {} stake {:.2} as contract {}",
            signal.short_id(),
            signal.symbol,
            signal.direction,
            stake,
            contract.contract_id
        );

        Ok(Position {
            signal_id: signal.id,
            contract_id: contract.contract_id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            stake,
            opened_at: Utc::now(),
            duration_secs: self.position_duration.as_secs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counterparty::{Contract, MockCounterparty, Quote, connection};
    use common::config::{EngineConfig, Profile};
    use common::models::{Direction, SignalDraft, SignalStatus};

    fn admitted(stake: f64) -> Signal {
        let mut s = Signal::from_draft(SignalDraft::new("feed", "R_25", Direction::Up, 0.9, "t"));
        s.admit(stake).unwrap();
        s.transition(SignalStatus::Executing).unwrap();
        s
    }

    fn executor(mock: MockCounterparty) -> Executor {
        let cfg = EngineConfig::for_profile(Profile::Aggressive);
        Executor::new(
            vec![connection(mock)],
            cfg.execution,
            cfg.settlement.position_duration,
        )
    }

    fn quote() -> Quote {
        Quote {
            id: "Q1".to_string(),
            ask_price: 23.0,
            payout: Some(42.55),
        }
    }

    #[tokio::test]
    async fn two_steps_open_a_position() {
        let mut mock = MockCounterparty::new();
        mock.expect_request_terms()
            .withf(|r| r.stake == 23.0 && r.symbol == "R_25" && r.duration_unit == "t")
            .times(1)
            .returning(|_| Ok(quote()));
        mock.expect_accept()
            .withf(|q, price| q.id == "Q1" && *price == 23.0)
            .times(1)
            .returning(|_, _| {
                Ok(Contract {
                    contract_id: "777".to_string(),
                    buy_price: 23.0,
                })
            });

        let signal = admitted(23.0);
        let pos = executor(mock).open(&signal).await.unwrap();
        assert_eq!(pos.contract_id, "777");
        assert_eq!(pos.signal_id, signal.id);
        assert_eq!(pos.stake, 23.0);
        assert_eq!(pos.duration_secs, 180);
    }

    #[tokio::test]
    async fn rejected_terms_skip_accept() {
        let mut mock = MockCounterparty::new();
        mock.expect_request_terms().returning(|_| {
            Err(CounterpartyError::Rejected {
                code: "MarketIsClosed".to_string(),
                message: "closed".to_string(),
            })
        });
        mock.expect_accept().never();

        let err = executor(mock).open(&admitted(23.0)).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Rejected { step: ProtocolStep::RequestTerms, ref code, .. } if code == "MarketIsClosed"
        ));
    }

    #[tokio::test]
    async fn lost_accept_answer_is_unconfirmed() {
        let mut mock = MockCounterparty::new();
        mock.expect_request_terms().returning(|_| Ok(quote()));
        mock.expect_accept()
            .returning(|_, _| Err(CounterpartyError::Transport("reset".to_string())));

        let err = executor(mock).open(&admitted(23.0)).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Unconfirmed {
                quote_id: "Q1".to_string(),
                reason: "reset".to_string()
            }
        );
    }

    #[tokio::test]
    async fn refused_accept_is_a_plain_rejection() {
        let mut mock = MockCounterparty::new();
        mock.expect_request_terms().returning(|_| Ok(quote()));
        mock.expect_accept().returning(|_, _| {
            Err(CounterpartyError::Rejected {
                code: "InvalidPrice".to_string(),
                message: "price moved".to_string(),
            })
        });

        let err = executor(mock).open(&admitted(23.0)).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Rejected { step: ProtocolStep::Accept, ref code, .. } if code == "InvalidPrice"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_accept_is_unconfirmed() {
        struct SlowAccept;
        #[async_trait::async_trait]
        impl crate::counterparty::Counterparty for SlowAccept {
            async fn request_terms(&mut self, _: &TermsRequest) -> Result<Quote, CounterpartyError> {
                Ok(quote())
            }
            async fn accept(&mut self, _: &Quote, _: f64) -> Result<Contract, CounterpartyError> {
                std::future::pending().await
            }
        }

        let cfg = EngineConfig::for_profile(Profile::Aggressive);
        let exec = Executor::new(
            vec![connection(SlowAccept)],
            cfg.execution.clone(),
            cfg.settlement.position_duration,
        );
        let err = exec.open(&admitted(23.0)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Unconfirmed { ref quote_id, .. } if quote_id == "Q1"));
    }

    #[tokio::test]
    async fn unadmitted_signal_is_refused() {
        let mut mock = MockCounterparty::new();
        mock.expect_request_terms().never();
        let s = Signal::from_draft(SignalDraft::new("feed", "R_25", Direction::Up, 0.9, "t"));
        let err = executor(mock).open(&s).await.unwrap_err();
        assert_eq!(err, ExecutionError::NotAdmitted(s.id));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_step_times_out() {
        struct Stalled;
        #[async_trait::async_trait]
        impl crate::counterparty::Counterparty for Stalled {
            async fn request_terms(&mut self, _: &TermsRequest) -> Result<Quote, CounterpartyError> {
                std::future::pending().await
            }
            async fn accept(&mut self, _: &Quote, _: f64) -> Result<Contract, CounterpartyError> {
                unreachable!()
            }
        }

        let cfg = EngineConfig::for_profile(Profile::Aggressive);
        let exec = Executor::new(vec![connection(Stalled)], cfg.execution.clone(), cfg.settlement.position_duration);
        let err = exec.open(&admitted(23.0)).await.unwrap_err();
        assert_eq!(
            err,
            ExecutionError::Timeout {
                step: ProtocolStep::RequestTerms,
                after: cfg.execution.step_timeout
            }
        );
    }
}
