//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-thread turn locks.

use crate::config::Config;
use refund_agent_core::ports::{ChatModelService, StoreService};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub store: Arc<dyn StoreService>,
    pub chat_model: Arc<dyn ChatModelService>,
    pub config: Arc<Config>,
    /// One lock per conversation thread. A thread never processes two user
    /// turns concurrently; turns on different threads run in parallel.
    turn_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn StoreService>,
        chat_model: Arc<dyn ChatModelService>,
        config: Arc<Config>,
    ) -> Self {
        AppState {
            store,
            chat_model,
            config,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the serialization lock for `thread_id`, creating it on first
    /// use. Locks whose thread has no turn in flight are pruned on the way.
    pub async fn turn_lock(&self, thread_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(thread_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
