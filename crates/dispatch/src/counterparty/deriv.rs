use async_trait::async_trait;
use common::models::Outcome;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{Contract, ContractLookup, Counterparty, CounterpartyError, Quote, TermsRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct AuthorizeReply {
    balance: f64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    loginid: String,
}

#[derive(Deserialize)]
struct ProposalReply {
    id: String,
    ask_price: f64,
    #[serde(default)]
    payout: Option<f64>,
}

#[derive(Deserialize)]
struct BuyReply {
    contract_id: Value,
    buy_price: f64,
}

#[derive(Deserialize)]
struct OpenContractReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    is_sold: Option<u8>,
}

/// One authorized websocket session against the Deriv trading API.
/// Broken sessions are re-established on the next exchange.
pub struct DerivConnection {
    url: String,
    token: String,
    ws: Option<WsStream>,
    next_req_id: u64,
}

impl DerivConnection {
    /// Connects and authorizes, returning the session and the account balance
    /// reported by the server.
    pub async fn connect(url: &str, token: &str) -> Result<(Self, f64), CounterpartyError> {
        let mut conn = Self {
            url: url.to_string(),
            token: token.to_string(),
            ws: None,
            next_req_id: 1,
        };
        let balance = conn.open_session().await?;
        Ok((conn, balance))
    }

    async fn open_session(&mut self) -> Result<f64, CounterpartyError> {
        info!("Connecting to {}", self.url);
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| CounterpartyError::Transport(e.to_string()))?;
        self.ws = Some(ws);

        let token = self.token.clone();
        let reply = self.send_request(json!({ "authorize": token })).await?;
        let auth: AuthorizeReply = field(&reply, "authorize")?;
        info!(
            "Authorized as {} with balance {:.2} {}",
            auth.loginid, auth.balance, auth.currency
        );
        Ok(auth.balance)
    }

    async fn exchange(&mut self, request: Value) -> Result<Value, CounterpartyError> {
        if self.ws.is_none() {
            self.open_session().await?;
        }
        let result = self.send_request(request).await;
        if let Err(CounterpartyError::Transport(ref e)) = result {
            warn!("Deriv session dropped: {}", e);
            self.ws = None;
        }
        result
    }

    async fn send_request(&mut self, mut request: Value) -> Result<Value, CounterpartyError> {
        let req_id = self.next_req_id;
        self.next_req_id += 1;
        request["req_id"] = json!(req_id);

        let ws = self
            .ws
            .as_mut()
            .ok_or_else(|| CounterpartyError::Transport("not connected".to_string()))?;

        ws.send(Message::Text(request.to_string().into()))
            .await
            .map_err(|e| CounterpartyError::Transport(e.to_string()))?;

        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let reply: Value = serde_json::from_str(text.as_str())
                        .map_err(|e| CounterpartyError::Protocol(e.to_string()))?;
                    if reply.get("req_id").and_then(Value::as_u64) != Some(req_id) {
                        debug!("Skipping unrelated message {}", reply["msg_type"]);
                        continue;
                    }
                    return check_error(reply);
                }
                Ok(Message::Ping(payload)) => {
                    ws.send(Message::Pong(payload))
                        .await
                        .map_err(|e| CounterpartyError::Transport(format!("pong failed: {e}")))?;
                }
                Ok(Message::Close(_)) => {
                    return Err(CounterpartyError::Transport("connection closed".to_string()));
                }
                Ok(_) => continue,
                Err(e) => return Err(CounterpartyError::Transport(e.to_string())),
            }
        }
        Err(CounterpartyError::Transport("stream ended".to_string()))
    }
}

#[async_trait]
impl Counterparty for DerivConnection {
    async fn request_terms(&mut self, request: &TermsRequest) -> Result<Quote, CounterpartyError> {
        let reply = self.exchange(proposal_request(request)).await?;
        let p: ProposalReply = field(&reply, "proposal")?;
        Ok(Quote {
            id: p.id,
            ask_price: p.ask_price,
            payout: p.payout,
        })
    }

    async fn accept(&mut self, quote: &Quote, price: f64) -> Result<Contract, CounterpartyError> {
        let reply = self
            .exchange(json!({ "buy": quote.id, "price": price }))
            .await?;
        let b: BuyReply = field(&reply, "buy")?;
        let contract_id = match b.contract_id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(Contract {
            contract_id,
            buy_price: b.buy_price,
        })
    }
}

#[async_trait]
impl ContractLookup for DerivConnection {
    async fn contract_outcome(&mut self, contract_id: &str) -> Result<Option<Outcome>, CounterpartyError> {
        let id: Value = contract_id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(contract_id));
        let reply = self
            .exchange(json!({ "proposal_open_contract": 1, "contract_id": id }))
            .await?;
        let c: OpenContractReply = field(&reply, "proposal_open_contract")?;
        Ok(outcome_of(&c))
    }
}

fn proposal_request(request: &TermsRequest) -> Value {
    json!({
        "proposal": 1,
        "amount": request.stake,
        "basis": "stake",
        "contract_type": request.direction.contract_type(),
        "currency": request.currency,
        "duration": request.duration,
        "duration_unit": request.duration_unit,
        "symbol": request.symbol,
    })
}

fn check_error(reply: Value) -> Result<Value, CounterpartyError> {
    match reply.get("error") {
        Some(err) => {
            let err: ApiError = serde_json::from_value(err.clone())
                .map_err(|e| CounterpartyError::Protocol(e.to_string()))?;
            Err(CounterpartyError::Rejected {
                code: err.code,
                message: err.message,
            })
        }
        None => Ok(reply),
    }
}

fn field<T: for<'de> Deserialize<'de>>(reply: &Value, key: &str) -> Result<T, CounterpartyError> {
    let inner = reply
        .get(key)
        .ok_or_else(|| CounterpartyError::Protocol(format!("reply has no '{key}'")))?;
    serde_json::from_value(inner.clone()).map_err(|e| CounterpartyError::Protocol(e.to_string()))
}

fn outcome_of(c: &OpenContractReply) -> Option<Outcome> {
    match c.status.as_deref() {
        Some("won") => Some(Outcome::Win),
        Some("lost") => Some(Outcome::Loss),
        _ if c.is_sold == Some(1) => Some(Outcome::Loss),
        _ => None,
    }
}
