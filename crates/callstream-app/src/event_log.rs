//! Background subscriber that mirrors bus events into logs and metrics.

use callstream_events::{EventBus, EventBusError};
use callstream_telemetry::Metrics;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn a task counting and logging every event published after this call.
///
/// The task ends once every bus handle has been dropped; callers that keep
/// the bus alive abort it at the end of the run.
#[must_use]
pub fn spawn_event_logger(events: &EventBus, metrics: Metrics) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        loop {
            match stream.recv().await {
                Ok(Some(envelope)) => {
                    let kind = envelope.event.kind();
                    metrics.inc_event(kind);
                    debug!(
                        event_id = envelope.id,
                        event = kind,
                        payload = ?envelope.event,
                        "run event"
                    );
                }
                Ok(None) => break,
                Err(EventBusError::Lagged { skipped }) => {
                    warn!(skipped, "event logger fell behind the bus");
                }
            }
        }
    })
}
