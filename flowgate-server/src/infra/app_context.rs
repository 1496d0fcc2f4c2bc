use std::{fmt, sync::Arc};

use flowgate_config::Config;
use flowgate_core::{bus::EventBus, mutex::MutexService, queue::AdmissionQueue};

/// Where locks and queue entries live for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// Process-local stores; only correct with a single instance.
    InMemory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::InMemory => "in_memory",
        }
    }
}

/// Everything request handlers need, shared across the router.
#[derive(Clone)]
pub struct AppContext {
    config: Arc<Config>,
    mutex: Arc<MutexService>,
    queue: Arc<AdmissionQueue>,
    bus: Arc<EventBus>,
    backend: StoreBackend,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("backend", &self.backend)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        mutex: Arc<MutexService>,
        queue: Arc<AdmissionQueue>,
        bus: Arc<EventBus>,
        backend: StoreBackend,
    ) -> Self {
        Self {
            config,
            mutex,
            queue,
            bus,
            backend,
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn mutex(&self) -> &MutexService {
        self.mutex.as_ref()
    }

    pub fn queue(&self) -> &AdmissionQueue {
        self.queue.as_ref()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn backend(&self) -> StoreBackend {
        self.backend
    }
}
