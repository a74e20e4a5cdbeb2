use std::sync::{Arc, Mutex};

use helpsl_db::Database;
use helpsl_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    /// Held from a write until its change is broadcast, so changes reach
    /// clients in commit order.
    pub writer: Mutex<()>,
}

impl AppStateInner {
    pub fn new(db: Database, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            dispatcher,
            writer: Mutex::new(()),
        }
    }
}
