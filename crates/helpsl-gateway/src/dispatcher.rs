use std::sync::Arc;

use tokio::sync::broadcast;

use helpsl_types::ChangeEvent;
use helpsl_types::events::ChangeEventPayload;

/// Fans committed row changes out to every connected realtime client.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every change; filtering by table happens per connection
    broadcast_tx: broadcast::Sender<ChangeEventPayload>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to change events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEventPayload> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a committed change. Dropped silently when nobody is listening.
    pub fn broadcast(&self, event: &ChangeEvent) {
        let _ = self.inner.broadcast_tx.send(event.to_payload());
    }
}
