use std::sync::MutexGuard;

use crate::broker::{Broker, SharedBroker};
use crate::db::DbPool;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex> — the chat/user store the
    /// surrounding REST layer consumes. The live broker never touches it.
    pub db: DbPool,
    /// The process-wide broker instance, created once at startup and
    /// passed explicitly so tests can run isolated instances.
    pub broker: SharedBroker,
}

impl AppState {
    /// Lock the broker. A poisoned lock is recovered rather than
    /// propagated: one panicking handler must not take the broker down
    /// for every other connection.
    pub fn broker(&self) -> MutexGuard<'_, Broker> {
        match self.broker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
