//! Headless, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber
//! receives every event without a slow subscriber blocking the dispatch
//! thread.  The dispatch loop publishes through [`BusSink`]
//! (see [`crate::sink`]); asynchronous consumers subscribe here.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::PointClouds`] | Decoded [`PointBatch`](cloudtap_types::PointBatch)es, one per sample |
//! | [`Topic::Status`] | [`Notification`](cloudtap_types::Notification)s: peer, liveliness, QoS, faults |

use cloudtap_types::{CloudError, Event};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// High-frequency decoded point batches.
    PointClouds,
    /// Low-frequency status notifications.
    Status,
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    point_clouds: broadcast::Sender<Event>,
    status: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (point_clouds, _) = broadcast::channel(capacity);
        let (status, _) = broadcast::channel(capacity);
        Self {
            point_clouds,
            status,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// [`CloudError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, CloudError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| CloudError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::PointClouds => &self.point_clouds,
            Topic::Status => &self.status,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` events were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Wait for the next event, skipping over lag.
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudtap_types::{EventPayload, Notification, PointBatch};

    fn batch_event(sequence: u64) -> Event {
        Event::new(
            "cloudtap-middleware::test",
            EventPayload::PointCloud(PointBatch {
                sequence,
                topic: "lidar".into(),
                points: Vec::new(),
            }),
        )
    }

    #[test]
    fn publish_no_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::PointClouds, batch_event(0));
        assert!(matches!(result, Err(CloudError::Channel(_))));
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::PointClouds);
        let mut subscriber2 = bus.subscribe_to(Topic::PointClouds);
        assert_eq!(bus.subscriber_count(Topic::PointClouds), 2);

        let event = batch_event(1);
        assert_eq!(bus.publish_to(Topic::PointClouds, event.clone())?, 2);

        assert_eq!(subscriber1.recv().await?.id, event.id);
        assert_eq!(subscriber2.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut status_sub = bus.subscribe_to(Topic::Status);
        let _clouds_sub = bus.subscribe_to(Topic::PointClouds);

        bus.publish_to(Topic::PointClouds, batch_event(2))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), status_sub.recv()).await;
        assert!(result.is_err(), "status subscriber must not see point clouds");
        assert_eq!(status_sub.topic(), Topic::Status);
        Ok(())
    }

    #[tokio::test]
    async fn next_event_skips_lag() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::Status);
        for _ in 0..16 {
            bus.publish_to(
                Topic::Status,
                Event::new("test", EventPayload::Status(Notification::PeerMatched)),
            )?;
        }
        let event = slow.next_event().await.ok_or("no event after lag")?;
        assert!(matches!(event.payload, EventPayload::Status(Notification::PeerMatched)));
        Ok(())
    }

    #[tokio::test]
    async fn next_event_ends_when_bus_dropped() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Status);
        drop(bus);
        assert!(rx.next_event().await.is_none());
    }
}
