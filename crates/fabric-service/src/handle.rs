//! A single named fabric and its lifecycle (§4.7's state machine).

use fabric_base::{EntityId, Error, Result, Ttl};
use fabric_bus::Accepter;
use fabric_cache::{CacheEngine, PersistenceSupervisor};
use fabric_model::EntityRecord;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FabricState {
    Init,
    Running,
    Draining,
    Closed,
}

/// A fabric, fully wired up: cache engine, its periodic persistence
/// supervisor, and (if configured) a stream-bus consumer loop.
///
/// The stream bus itself is owned by the cache engine (and, independently,
/// by the spawned consumer-loop task) — this handle only needs the
/// cancellation token to stop that loop on `shutdown`.
pub struct FabricHandle {
    name: String,
    engine: Arc<CacheEngine>,
    state: Mutex<FabricState>,
    persistence: Mutex<Option<PersistenceSupervisor>>,
    consumer_shutdown: CancellationToken,
    drain_timeout: Duration,
}

impl FabricHandle {
    pub(crate) fn new(
        name: String,
        engine: Arc<CacheEngine>,
        persistence: PersistenceSupervisor,
        consumer_shutdown: CancellationToken,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            name,
            engine,
            state: Mutex::new(FabricState::Running),
            persistence: Mutex::new(Some(persistence)),
            consumer_shutdown,
            drain_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FabricState {
        *self.state.lock().expect("fabric state lock poisoned")
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            FabricState::Running => Ok(()),
            _ => Err(Error::Shutdown(self.name.clone())),
        }
    }

    pub async fn read(&self, id: EntityId) -> Result<Option<EntityRecord>> {
        self.ensure_running()?;
        self.engine.read(id).await
    }

    pub async fn read_or_create<F>(&self, id: EntityId, factory: F) -> Result<EntityRecord>
    where
        F: FnOnce() -> EntityRecord,
    {
        self.ensure_running()?;
        self.engine.read_or_create(id, factory).await
    }

    pub async fn write(&self, record: EntityRecord) -> Result<()> {
        self.ensure_running()?;
        self.engine.write(record).await
    }

    pub async fn remove(&self, id: EntityId) -> Result<()> {
        self.ensure_running()?;
        self.engine.remove(id).await
    }

    pub async fn publish(&self, action: &str, payload: &str, ttl: Ttl) -> Result<()> {
        self.ensure_running()?;
        self.engine.publish(action, payload, ttl).await
    }

    pub fn register_accepter(&self, action: impl Into<String>, accepter: Arc<dyn Accepter>) {
        self.engine.register_accepter(action, accepter);
    }

    /// Stops timers, drains in-flight persistences (bounded by
    /// `drain_timeout`), and closes the stream-bus consumer. Idempotent:
    /// calling it twice is a no-op the second time.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().expect("fabric state lock poisoned");
            if *state != FabricState::Running {
                return;
            }
            *state = FabricState::Draining;
        }

        self.consumer_shutdown.cancel();

        let supervisor = self.persistence.lock().expect("persistence lock poisoned").take();
        if let Some(supervisor) = supervisor {
            if tokio::time::timeout(self.drain_timeout, supervisor.shutdown()).await.is_err() {
                tracing::warn!(fabric = %self.name, "persistence supervisor did not drain within the bound; residual task force-cancelled by its own abort");
            }
        }

        *self.state.lock().expect("fabric state lock poisoned") = FabricState::Closed;
    }
}
