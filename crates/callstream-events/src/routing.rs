//! Event bus routing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError};

use crate::error::{EventBusError, EventBusResult};
use crate::payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    replay: Arc<Mutex<VecDeque<EventEnvelope>>>,
    replay_capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a bus with a custom replay capacity.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        let replay_capacity = replay_capacity.max(1);
        let (sender, _) = broadcast::channel(replay_capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(VecDeque::with_capacity(replay_capacity))),
            replay_capacity,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to all subscribers, returning its identifier.
    ///
    /// Publishing never blocks and succeeds even without subscribers.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut replay = self.lock_replay();
            if replay.len() == self.replay_capacity {
                let _ = replay.pop_front();
            }
            replay.push_back(envelope.clone());
        }
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let receiver = self.sender.subscribe();
        let backlog = since_id.map_or_else(VecDeque::new, |since| {
            self.backlog_since(since).into_iter().collect()
        });
        let resume_after = backlog.back().map_or(0, |env: &EventEnvelope| env.id);
        EventStream {
            backlog,
            receiver,
            resume_after,
        }
    }

    /// Collect a backlog of events emitted after the specified id.
    #[must_use]
    pub fn backlog_since(&self, id: EventId) -> Vec<EventEnvelope> {
        self.lock_replay()
            .iter()
            .filter(|env| env.id > id)
            .cloned()
            .collect()
    }

    fn lock_replay(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber handle yielding replayed events first, then live ones.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    resume_after: EventId,
}

impl EventStream {
    /// Receive the next event.
    ///
    /// Returns `Ok(None)` once every bus handle has been dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Lagged`] when the subscriber fell behind; the
    /// stream stays usable and continues with the oldest retained event.
    pub async fn recv(&mut self) -> EventBusResult<Option<EventEnvelope>> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(Some(event));
        }
        loop {
            match self.receiver.recv().await {
                // Events already delivered from the backlog are skipped.
                Ok(event) if event.id <= self.resume_after => {}
                Ok(event) => return Ok(Some(event)),
                Err(RecvError::Lagged(skipped)) => return Err(EventBusError::Lagged { skipped }),
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    /// Receive the next event, silently skipping over lag.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.recv().await {
                Ok(event) => return event,
                Err(EventBusError::Lagged { .. }) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn stage_event(id: usize) -> Event {
        Event::StageCompleted {
            file: format!("merged_{id}.wav"),
            stage: "download".into(),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(stage_event(i));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.backlog_since(0).last().map(|env| env.id), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event.id);
            }
        }
        assert_eq!(received, vec![3, 4, 5]);

        let _ = bus.publish(stage_event(6));
        let live = stream.next().await.map(|env| env.id);
        assert_eq!(live, Some(6));
    }

    #[tokio::test]
    async fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for i in 0..4 {
            let _ = bus.publish(stage_event(i));
        }
        let ids: Vec<_> = bus.backlog_since(0).into_iter().map(|env| env.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn lagging_subscriber_reports_skipped_events() {
        let bus = EventBus::with_capacity(2);
        let mut stream = bus.subscribe(None);
        for i in 0..5 {
            let _ = bus.publish(stage_event(i));
        }
        match stream.recv().await {
            Err(err) => assert_eq!(err.skipped(), 3),
            Ok(other) => panic!("expected lag, got {other:?}"),
        }
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn stream_closes_when_bus_dropped() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe(None);
        drop(bus);
        assert_eq!(stream.recv().await, Ok(None));
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    let published = timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish(stage_event(i));
                    })
                    .await;
                    if published.is_err() {
                        return false;
                    }
                }
                true
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        assert!(publisher.await?);
        let ids = consumer.await?;
        assert_eq!(ids.len(), 500);
        Ok(())
    }
}
