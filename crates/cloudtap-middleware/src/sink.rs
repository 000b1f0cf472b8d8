//! Output sinks.
//!
//! The dispatch loop hands every decoded batch and every notification to an
//! [`OutputSink`].  Delivery is fire-and-forget: the loop neither waits for
//! nor expects an acknowledgement.

use std::sync::{Arc, Mutex, PoisonError};

use cloudtap_types::{Event, EventPayload, Notification, PointBatch};
use tracing::trace;

use crate::bus::{EventBus, Topic};

/// Consumer of dispatch output.
pub trait OutputSink: Send {
    fn emit_batch(&mut self, batch: PointBatch);
    fn emit_notification(&mut self, notification: Notification);
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn emit_batch(&mut self, batch: PointBatch) {
        (**self).emit_batch(batch);
    }

    fn emit_notification(&mut self, notification: Notification) {
        (**self).emit_notification(notification);
    }
}

/// Sink that forwards everything onto an [`EventBus`].
///
/// Batches go to [`Topic::PointClouds`] and notifications to
/// [`Topic::Status`], each wrapped in an [`Event`] stamped with `source`.
/// Events published while nobody listens are dropped.
#[derive(Debug, Clone)]
pub struct BusSink {
    bus: EventBus,
    source: String,
}

impl BusSink {
    pub fn new(bus: EventBus, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }

    fn forward(&self, topic: Topic, payload: EventPayload) {
        if let Err(e) = self.bus.publish_to(topic, Event::new(self.source.clone(), payload)) {
            trace!(?topic, error = %e, "event dropped");
        }
    }
}

impl OutputSink for BusSink {
    fn emit_batch(&mut self, batch: PointBatch) {
        self.forward(Topic::PointClouds, EventPayload::PointCloud(batch));
    }

    fn emit_notification(&mut self, notification: Notification) {
        self.forward(Topic::Status, EventPayload::Status(notification));
    }
}

#[derive(Debug, Default)]
struct Collected {
    batches: Vec<PointBatch>,
    notifications: Vec<Notification>,
}

/// Sink that records everything in memory.  Clones share the record, so a
/// clone kept outside the dispatch thread can inspect what was emitted.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    inner: Arc<Mutex<Collected>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<PointBatch> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batches
            .clone()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notifications
            .clone()
    }
}

impl OutputSink for CollectingSink {
    fn emit_batch(&mut self, batch: PointBatch) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batches
            .push(batch);
    }

    fn emit_notification(&mut self, notification: Notification) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notifications
            .push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(sequence: u64) -> PointBatch {
        PointBatch {
            sequence,
            topic: "t".into(),
            points: Vec::new(),
        }
    }

    #[test]
    fn collecting_sink_clones_share_record() {
        let sink = CollectingSink::new();
        let mut boxed: Box<dyn OutputSink> = Box::new(sink.clone());
        boxed.emit_batch(batch(7));
        boxed.emit_notification(Notification::PeerMatched);

        assert_eq!(sink.batches()[0].sequence, 7);
        assert_eq!(sink.notifications(), vec![Notification::PeerMatched]);
    }

    #[tokio::test]
    async fn bus_sink_routes_by_payload() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut clouds = bus.subscribe_to(Topic::PointClouds);
        let mut status = bus.subscribe_to(Topic::Status);
        let mut sink = BusSink::new(bus, "cloudtap-middleware::dispatch");

        sink.emit_batch(batch(3));
        sink.emit_notification(Notification::PeerUnmatched);

        let event = clouds.recv().await?;
        assert_eq!(event.source, "cloudtap-middleware::dispatch");
        assert!(matches!(event.payload, EventPayload::PointCloud(ref b) if b.sequence == 3));
        let event = status.recv().await?;
        assert!(matches!(event.payload, EventPayload::Status(Notification::PeerUnmatched)));
        Ok(())
    }

    #[test]
    fn bus_sink_without_subscribers_drops_silently() {
        let mut sink = BusSink::new(EventBus::default(), "test");
        sink.emit_batch(batch(0));
        sink.emit_notification(Notification::ShutdownRequested);
    }
}
