use std::collections::HashSet;
use std::sync::Arc;

use common::models::{AccountSnapshot, EngineEvent, Signal};
use uuid::Uuid;

use crate::account::AccountBook;
use crate::registry::SubscriberRegistry;

/// Read-only view over the running engine.
#[derive(Clone)]
pub struct QueryService {
    book: Arc<AccountBook>,
    registry: SubscriberRegistry,
}

impl QueryService {
    pub fn new(book: Arc<AccountBook>, registry: SubscriberRegistry) -> Self {
        Self { book, registry }
    }

    pub async fn account(&self) -> AccountSnapshot {
        self.book.snapshot().await
    }

    /// Live positions, counted by the account rather than from event history.
    pub async fn open_positions(&self) -> usize {
        self.book.open_positions().await
    }

    /// Latest known state of up to `limit` signals, most recently updated first.
    pub fn recent_signals(&self, limit: usize) -> Vec<Signal> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut out: Vec<Signal> = Vec::new();
        if limit == 0 {
            return out;
        }

        for ev in self.registry.history(usize::MAX).iter().rev() {
            let Some(signal) = ev.event.signal() else {
                continue;
            };
            if !seen.insert(signal.id) {
                continue;
            }
            out.push(signal.clone());
            if out.len() == limit {
                break;
            }
        }
        out
    }

    pub fn recent_events(&self, limit: usize) -> Vec<Arc<EngineEvent>> {
        self.registry.history(limit)
    }
}
