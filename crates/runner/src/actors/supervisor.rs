use std::{collections::HashMap, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, Instant},
};

use common::actors::{Actor, ActorType, ControlMessage};

pub type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

const CHECK_INTERVAL: Duration = Duration::from_secs(1);
const PULSE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Supervisor {
    actor_factories: HashMap<ActorType, ActorFactory>,
    instances: HashMap<Uuid, ActorType>,
    pulses: HashMap<ActorType, Instant>,
    handles: HashMap<ActorType, JoinHandle<()>>,
    restarts: HashMap<ActorType, u32>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            actor_factories: HashMap::new(),
            instances: HashMap::new(),
            pulses: HashMap::new(),
            handles: HashMap::new(),
            restarts: HashMap::new(),
        }
    }

    pub fn register_actor(&mut self, actor_type: ActorType, factory: ActorFactory) {
        self.actor_factories.insert(actor_type, factory);
    }

    pub fn restarts(&self, actor_type: ActorType) -> u32 {
        self.restarts.get(&actor_type).copied().unwrap_or(0)
    }

    /// Runs every registered actor and restarts any whose heartbeat goes
    /// quiet, until `shutdown` fires.
    pub async fn start(&mut self, shutdown: CancellationToken) {
        let mut check_interval = time::interval(CHECK_INTERVAL);

        let (supervisor_tx, mut supervisor_rx) = mpsc::channel::<ControlMessage>(512);

        let actors: Vec<ActorType> = self.actor_factories.keys().copied().collect();
        actors.into_iter().for_each(|actor| {
            self.spawn_actor(actor, supervisor_tx.clone());
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Supervisor stopping {} actors", self.handles.len());
                    for (_, handle) in self.handles.drain() {
                        handle.abort();
                    }
                    return;
                }

                Some(msg) = supervisor_rx.recv() => {
                    match msg {
                        ControlMessage::Heartbeat(id) => {
                            if let Some(actor_type) = self.instances.get(&id) {
                                self.pulses.insert(*actor_type, Instant::now());
                            }
                        }
                        ControlMessage::Shutdown(id) => {
                            if let Some(actor_type) = self.instances.remove(&id) {
                                warn!("{:?} is shutting down gracefully.", actor_type);
                                self.pulses.remove(&actor_type);
                                if let Some(handle) = self.handles.remove(&actor_type) {
                                    handle.abort();
                                }
                            }
                        },
                        ControlMessage::Error(id, error_msg) => {
                            if let Some(actor_type) = self.instances.get(&id) {
                                error!("Actor {:?} reported error: {}", actor_type, error_msg);
                            }
                        },
                    }
                }

                _ = check_interval.tick() => {
                    let dead_timeout = Instant::now() - PULSE_TIMEOUT;

                    let dead_actors: Vec<ActorType> = self
                        .pulses
                        .iter()
                        .filter(|(_, seen)| **seen < dead_timeout)
                        .map(|(actor, _)| *actor)
                        .collect();

                    for actor in dead_actors {
                        warn!("{:?} is unresponsive!", actor);
                        if let Some(handle) = self.handles.remove(&actor) {
                            handle.abort();
                        }
                        *self.restarts.entry(actor).or_default() += 1;
                        self.spawn_actor(actor, supervisor_tx.clone());
                    }
                }
            }
        }
    }

    fn spawn_actor(&mut self, actor_type: ActorType, tx: mpsc::Sender<ControlMessage>) {
        let Some(factory) = self.actor_factories.get(&actor_type) else {
            return;
        };
        let mut new_actor = factory();
        self.instances.retain(|_, t| *t != actor_type);
        self.instances.insert(new_actor.id(), actor_type);

        let new_actor_handle = tokio::spawn(async move {
            if let Err(e) = new_actor.run(tx).await {
                error!("Actor {:?} crashed: {}", actor_type, e);
            }
        });
        self.handles.insert(actor_type, new_actor_handle);
        self.pulses.insert(actor_type, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Crashing {
        id: Uuid,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Actor for Crashing {
        fn name(&self) -> ActorType {
            ActorType::StatusReporter
        }

        fn id(&self) -> Uuid {
            self.id
        }

        async fn run(&mut self, _supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom")
        }
    }

    struct Steady {
        id: Uuid,
        runs: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Actor for Steady {
        fn name(&self) -> ActorType {
            ActorType::TradingCycle
        }

        fn id(&self) -> Uuid {
            self.id
        }

        async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let _heartbeat = self.spawn_heartbeat(supervisor_tx);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_actor_is_restarted_and_healthy_one_is_left_alone() {
        let crashing_runs = Arc::new(AtomicU32::new(0));
        let steady_runs = Arc::new(AtomicU32::new(0));

        let mut supervisor = Supervisor::new();
        let runs = crashing_runs.clone();
        supervisor.register_actor(
            ActorType::StatusReporter,
            Box::new(move || {
                Box::new(Crashing {
                    id: Uuid::new_v4(),
                    runs: runs.clone(),
                })
            }),
        );
        let runs = steady_runs.clone();
        supervisor.register_actor(
            ActorType::TradingCycle,
            Box::new(move || {
                Box::new(Steady {
                    id: Uuid::new_v4(),
                    runs: runs.clone(),
                })
            }),
        );

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(10)).await;
            stopper.cancel();
        });
        supervisor.start(shutdown).await;

        assert!(crashing_runs.load(Ordering::SeqCst) >= 2);
        assert!(supervisor.restarts(ActorType::StatusReporter) >= 1);
        assert_eq!(steady_runs.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.restarts(ActorType::TradingCycle), 0);
    }
}
