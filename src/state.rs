use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::cognitive::CognitiveEngine;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    engine: Arc<CognitiveEngine>,
    store_backend: &'static str,
}

impl AppState {
    pub fn new(engine: Arc<CognitiveEngine>, store_backend: &'static str) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            engine,
            store_backend,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn engine(&self) -> &CognitiveEngine {
        &self.engine
    }

    pub fn engine_arc(&self) -> Arc<CognitiveEngine> {
        Arc::clone(&self.engine)
    }

    /// `"postgres"` or `"memory"`.
    pub fn store_backend(&self) -> &'static str {
        self.store_backend
    }
}
