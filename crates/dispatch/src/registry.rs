use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use common::models::{EngineEvent, TradeEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

pub type SubscriberId = u64;

/// Receiving end handed to a listener. Dropping it unsubscribes lazily on the
/// next publish.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<EngineEvent>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<EngineEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<EngineEvent>> {
        self.rx.try_recv().ok()
    }
}

struct RegistryState {
    next_seq: u64,
    next_id: SubscriberId,
    subscribers: Vec<(SubscriberId, mpsc::Sender<Arc<EngineEvent>>)>,
    history: VecDeque<Arc<EngineEvent>>,
}

/// Best-effort fan-out of engine events.
///
/// Every subscriber gets a bounded queue. Publishing never waits: a
/// subscriber whose queue is full is cut off, one whose receiver is gone is
/// forgotten. Sequence numbers are assigned and delivered under one lock, so
/// each subscriber sees events in publish order.
#[derive(Clone)]
pub struct SubscriberRegistry {
    state: Arc<Mutex<RegistryState>>,
    queue_capacity: usize,
    history_capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize, history_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                next_seq: 0,
                next_id: 0,
                subscribers: Vec::new(),
                history: VecDeque::with_capacity(history_capacity),
            })),
            queue_capacity: queue_capacity.max(1),
            history_capacity,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, tx));
        debug!("Subscriber {} registered", id);
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(sid, _)| *sid != id);
        before != state.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn publish(&self, event: TradeEvent) -> Arc<EngineEvent> {
        let mut state = self.state.lock();
        let stamped = Arc::new(EngineEvent {
            seq: state.next_seq,
            at: Utc::now(),
            event,
        });
        state.next_seq += 1;

        if self.history_capacity > 0 {
            if state.history.len() == self.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(stamped.clone());
        }

        state.subscribers.retain(|(id, tx)| match tx.try_send(stamped.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber {} is not keeping up, dropping it", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Subscriber {} went away", id);
                false
            }
        });

        stamped
    }

    /// Up to `limit` most recent events, oldest first.
    pub fn history(&self, limit: usize) -> Vec<Arc<EngineEvent>> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn countdown(remaining: u64) -> TradeEvent {
        TradeEvent::Countdown {
            signal_id: Uuid::nil(),
            contract_id: "C".to_string(),
            symbol: "R_50".to_string(),
            remaining_secs: remaining,
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let registry = SubscriberRegistry::new(16, 16);
        let mut sub = registry.subscribe();
        for i in 0..5 {
            registry.publish(countdown(i));
        }
        for expected in 0..5 {
            let ev = sub.recv().await.unwrap();
            assert_eq!(ev.seq, expected);
        }
    }

    #[tokio::test]
    async fn stalled_subscriber_is_dropped_without_blocking_others() {
        let registry = SubscriberRegistry::new(2, 0);
        let _stalled = registry.subscribe();
        let mut active = registry.subscribe();

        for i in 0..10 {
            registry.publish(countdown(i));
            assert_eq!(active.recv().await.unwrap().seq, i);
        }
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn dropped_receiver_is_forgotten() {
        let registry = SubscriberRegistry::new(4, 4);
        let sub = registry.subscribe();
        drop(sub);
        registry.publish(countdown(1));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = SubscriberRegistry::new(4, 4);
        let mut sub = registry.subscribe();
        assert!(registry.unsubscribe(sub.id()));
        assert!(!registry.unsubscribe(sub.id()));
        registry.publish(countdown(1));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn history_is_bounded() {
        let registry = SubscriberRegistry::new(4, 3);
        for i in 0..5 {
            registry.publish(countdown(i));
        }
        let seqs: Vec<u64> = registry.history(10).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
        assert_eq!(registry.history(1)[0].seq, 4);
    }
}
