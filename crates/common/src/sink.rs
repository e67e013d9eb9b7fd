use crate::models::{DailySummary, Position, Settlement, Signal};

/// Fire-and-forget persistence. Implementations must never block the caller;
/// failures are theirs to log.
pub trait PersistenceSink: Send + Sync {
    fn record_signal(&self, signal: &Signal);

    /// Called once when the position opens (`settlement == None`) and once
    /// more when it settles.
    fn record_position(&self, position: &Position, settlement: Option<&Settlement>);

    fn record_daily_summary(&self, summary: &DailySummary);
}

/// Sink that drops everything.
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn record_signal(&self, _signal: &Signal) {}
    fn record_position(&self, _position: &Position, _settlement: Option<&Settlement>) {}
    fn record_daily_summary(&self, _summary: &DailySummary) {}
}
