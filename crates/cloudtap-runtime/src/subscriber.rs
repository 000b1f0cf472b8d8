//! Subscriber lifecycle.
//!
//! [`Subscriber::start`] bootstraps a session and moves its dispatch loop
//! onto a named OS thread.  A bootstrap failure is returned before any
//! thread exists.  [`Subscriber::stop`] raises the session's terminate guard
//! and joins the thread, yielding the loop's [`DispatchStats`].
//!
//! [`SubscriptionManager`] keeps at most one subscriber per topic.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cloudtap_middleware::{DispatchConfig, DispatchLoop, DispatchStats, GuardCondition, OutputSink, SessionFactory};
use cloudtap_types::CloudError;
use tracing::{error, info, info_span, warn};

/// A dispatch loop running on its own thread.
///
/// Dropping a running subscriber stops it.
pub struct Subscriber {
    topic: String,
    terminate: GuardCondition,
    handle: Option<JoinHandle<Result<DispatchStats, CloudError>>>,
}

impl Subscriber {
    /// Create a session on `topic` and start dispatching it into `sink`.
    ///
    /// # Errors
    ///
    /// [`CloudError::SessionBootstrap`] when the session cannot be created
    /// or the dispatch thread cannot be spawned.
    pub fn start<S>(
        factory: &dyn SessionFactory,
        topic: &str,
        sink: S,
        config: DispatchConfig,
    ) -> Result<Self, CloudError>
    where
        S: OutputSink + 'static,
    {
        let session = factory.create_session(topic)?;
        let dispatch = DispatchLoop::new(session, sink, config);
        let terminate = dispatch.terminate_condition();

        let span_topic = topic.to_string();
        let handle = thread::Builder::new()
            .name(format!("cloudtap-dispatch:{topic}"))
            .spawn(move || {
                let span = info_span!("dispatch", topic = %span_topic);
                let _entered = span.enter();
                dispatch.run()
            })
            .map_err(|e| CloudError::SessionBootstrap(format!("failed to spawn dispatch thread: {e}")))?;

        info!(%topic, "subscriber started");
        Ok(Self {
            topic: topic.to_string(),
            terminate,
            handle: Some(handle),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The guard that stops this subscriber.  Raising it from a signal
    /// handler is enough to begin shutdown.
    pub fn terminate_condition(&self) -> GuardCondition {
        self.terminate.clone()
    }

    /// `false` once the dispatch thread has returned, for whatever reason.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for its thread.
    ///
    /// # Errors
    ///
    /// The fatal error that ended the loop, or [`CloudError::SessionLost`]
    /// when the dispatch thread panicked.
    pub fn stop(mut self) -> Result<DispatchStats, CloudError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<DispatchStats, CloudError> {
        let Some(handle) = self.handle.take() else {
            return Ok(DispatchStats::default());
        };
        self.terminate.set_trigger_value(true);
        let result = handle.join().map_err(|_| {
            CloudError::SessionLost(format!("dispatch thread for {} panicked", self.topic))
        })?;
        match &result {
            Ok(stats) => info!(topic = %self.topic, batches = stats.batches, "subscriber stopped"),
            Err(e) => error!(topic = %self.topic, error = %e, "subscriber ended with error"),
        }
        result
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Errors were already logged by `shutdown`.
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic)
            .field("running", &self.is_running())
            .finish()
    }
}

/// One [`Subscriber`] per topic, all created from the same factory.
pub struct SubscriptionManager {
    factory: Arc<dyn SessionFactory>,
    config: DispatchConfig,
    subscribers: HashMap<String, Subscriber>,
}

impl SubscriptionManager {
    pub fn new(factory: Arc<dyn SessionFactory>, config: DispatchConfig) -> Self {
        Self {
            factory,
            config,
            subscribers: HashMap::new(),
        }
    }

    /// Start dispatching `topic` into `sink`.
    ///
    /// Returns `Ok(false)` without touching the running subscriber when the
    /// topic is already subscribed.
    ///
    /// # Errors
    ///
    /// Bootstrap failures from [`Subscriber::start`].
    pub fn subscribe<S>(&mut self, topic: &str, sink: S) -> Result<bool, CloudError>
    where
        S: OutputSink + 'static,
    {
        if self.subscribers.contains_key(topic) {
            warn!("Already subscribed to {topic}");
            return Ok(false);
        }
        let subscriber = Subscriber::start(self.factory.as_ref(), topic, sink, self.config)?;
        self.subscribers.insert(topic.to_string(), subscriber);
        Ok(true)
    }

    /// Stop the subscriber on `topic`.
    ///
    /// Returns `None` when the topic was not subscribed.
    pub fn unsubscribe(&mut self, topic: &str) -> Option<Result<DispatchStats, CloudError>> {
        match self.subscribers.remove(topic) {
            Some(subscriber) => Some(subscriber.stop()),
            None => {
                warn!("Not subscribed to {topic}");
                None
            }
        }
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribers.contains_key(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribers.keys().cloned().collect()
    }

    /// Terminate guards of every running subscriber.
    pub fn terminate_conditions(&self) -> Vec<GuardCondition> {
        self.subscribers
            .values()
            .map(Subscriber::terminate_condition)
            .collect()
    }

    /// `true` when any subscriber's thread has exited on its own.
    pub fn any_finished(&self) -> bool {
        self.subscribers.values().any(|s| !s.is_running())
    }

    /// Stop every subscriber, returning each topic's outcome.
    pub fn unsubscribe_all(&mut self) -> Vec<(String, Result<DispatchStats, CloudError>)> {
        self.subscribers
            .drain()
            .map(|(topic, subscriber)| {
                let result = subscriber.stop();
                (topic, result)
            })
            .collect()
    }
}
