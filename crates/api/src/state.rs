use std::sync::Arc;

use atrium_db::DbPool;
use atrium_events::EventBus;
use atrium_worker::WorkerPool;

/// Handles shared by every request; cloning copies three pointers.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    /// Running jobs; the cancel endpoint stops workers through it.
    pub workers: Arc<WorkerPool>,
    /// Lifecycle events, fanned out to WebSocket clients.
    pub event_bus: Arc<EventBus>,
}

impl AppState {
    pub fn new(pool: DbPool, workers: Arc<WorkerPool>, event_bus: Arc<EventBus>) -> Self {
        Self {
            pool,
            workers,
            event_bus,
        }
    }
}
