use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Contract, Counterparty, CounterpartyError, Quote, TermsRequest};

static NEXT_QUOTE: AtomicU64 = AtomicU64::new(1);
static NEXT_CONTRACT: AtomicU64 = AtomicU64::new(1);

/// Simulated counterparty that accepts every request.
#[derive(Debug, Clone, Default)]
pub struct PaperCounterparty {
    latency: Duration,
    payout_factor: f64,
}

impl PaperCounterparty {
    pub fn new(payout_factor: f64) -> Self {
        Self {
            latency: Duration::ZERO,
            payout_factor,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Counterparty for PaperCounterparty {
    async fn request_terms(&mut self, request: &TermsRequest) -> Result<Quote, CounterpartyError> {
        self.simulate_latency().await;
        if request.stake <= 0.0 {
            return Err(CounterpartyError::Rejected {
                code: "InvalidStake".to_string(),
                message: format!("stake {} is not positive", request.stake),
            });
        }
        let id = format!("PAPER-Q{}", NEXT_QUOTE.fetch_add(1, Ordering::Relaxed));
        debug!("Paper quote {} for {} {} {:.2}", id, request.symbol, request.direction, request.stake);
        Ok(Quote {
            id,
            ask_price: request.stake,
            payout: Some(request.stake * (1.0 + self.payout_factor)),
        })
    }

    async fn accept(&mut self, quote: &Quote, price: f64) -> Result<Contract, CounterpartyError> {
        self.simulate_latency().await;
        if price + f64::EPSILON < quote.ask_price {
            return Err(CounterpartyError::Rejected {
                code: "PriceMoved".to_string(),
                message: format!("price {:.2} below ask {:.2}", price, quote.ask_price),
            });
        }
        Ok(Contract {
            contract_id: format!("PAPER-{}", NEXT_CONTRACT.fetch_add(1, Ordering::Relaxed)),
            buy_price: quote.ask_price,
        })
    }
}
