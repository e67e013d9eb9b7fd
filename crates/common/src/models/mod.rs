pub mod account;
pub mod event;
pub mod position;
pub mod signal;

pub use account::{AccountSnapshot, DailySummary};
pub use event::{EngineEvent, RejectReason, TradeEvent};
pub use position::{Outcome, Position, Settlement};
pub use signal::{Direction, Signal, SignalDraft, SignalStatus, TransitionError};
