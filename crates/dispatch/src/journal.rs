use std::sync::Arc;

use common::models::{EngineEvent, TradeEvent};
use common::sink::PersistenceSink;

use crate::registry::SubscriberRegistry;

/// Publishes engine events and mirrors signal state into persistence.
#[derive(Clone)]
pub struct Journal {
    registry: SubscriberRegistry,
    sink: Arc<dyn PersistenceSink>,
}

impl Journal {
    pub fn new(registry: SubscriberRegistry, sink: Arc<dyn PersistenceSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &dyn PersistenceSink {
        self.sink.as_ref()
    }

    /// Records the signal's current state, then broadcasts the event.
    pub fn signal_event(&self, event: TradeEvent) -> Arc<EngineEvent> {
        if let Some(signal) = event.signal() {
            self.sink.record_signal(signal);
        }
        self.registry.publish(event)
    }

    pub fn publish(&self, event: TradeEvent) -> Arc<EngineEvent> {
        self.registry.publish(event)
    }
}
