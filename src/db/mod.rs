mod event_store;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::core::EventBus;

pub use event_store::{EventStore, EventStoreError, RECORDED_EVENT_TYPES};

/// Connects the optional event store and subscribes it to the bus. Failures are logged and
/// leave the service running with in-process events only.
pub async fn attach_event_store(
    url: Option<&str>,
    bus: &EventBus,
) -> Option<(Arc<EventStore>, JoinHandle<()>)> {
    let url = url?;
    match EventStore::connect(url).await {
        Ok(store) => {
            let store = Arc::new(store);
            let receiver = EventStore::subscribe(bus).await;
            let handle = Arc::clone(&store).spawn_recorder(receiver);
            tracing::info!("event store attached");
            Some((store, handle))
        }
        Err(err) => {
            tracing::warn!(error = %err, "event store not initialized");
            None
        }
    }
}
