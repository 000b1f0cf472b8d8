//! In-process loopback session.
//!
//! [`Loopback`] is a [`SessionFactory`] over a set of in-memory topics.
//! [`LoopbackTopic`] is the publisher side of one of them.  Every topic keeps
//! its own sample queue, status counters and status condition, so sessions on
//! different topics never see each other's traffic.  The status semantics
//! mimic a real publish/subscribe middleware closely enough to drive the
//! dispatch loop end to end:
//!
//! * every publisher-side event accumulates into the matching status and
//!   raises its bit on the topic's status condition;
//! * reading a status through the reader resets its `*_change` counters and
//!   clears its bit;
//! * `DATA_AVAILABLE` stays raised until a take finds the queue empty.
//!
//! Failure injection (`fail_next_wait`, `fail_status_read`, `lose_session`,
//! `refuse_sessions`) lets tests exercise the error paths of the loop.
//!
//! ```rust
//! use cloudtap_middleware::{Loopback, SessionFactory};
//!
//! let loopback = Loopback::new();
//! let session = loopback.create_session("demo").unwrap();
//! assert_eq!(session.topic, "demo");
//! loopback.topic("demo").match_publisher();
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cloudtap_types::{CloudError, PointCloudMessage};
use tracing::{debug, warn};

use crate::condition::{
    Condition, ConditionId, ConditionSet, GuardCondition, WaitSignal, next_condition_id,
};
use crate::session::{PointCloudReader, SampleInfo, SessionFactory, SubscriptionSession};
use crate::status::{
    LivelinessChangedStatus, RequestedDeadlineMissedStatus, RequestedIncompatibleQosStatus,
    StatusMask, SubscriptionMatchedStatus,
};

#[derive(Debug)]
struct TopicState {
    status_condition: ConditionId,
    queue: VecDeque<(PointCloudMessage, SampleInfo)>,
    changes: StatusMask,
    matched: SubscriptionMatchedStatus,
    deadline: RequestedDeadlineMissedStatus,
    liveliness: LivelinessChangedStatus,
    incompatible_qos: RequestedIncompatibleQosStatus,
    wait_faults: VecDeque<String>,
    unreadable: Vec<(StatusMask, String)>,
}

impl TopicState {
    fn new() -> Self {
        Self {
            status_condition: next_condition_id(),
            queue: VecDeque::new(),
            changes: StatusMask::default(),
            matched: SubscriptionMatchedStatus::default(),
            deadline: RequestedDeadlineMissedStatus::default(),
            liveliness: LivelinessChangedStatus::default(),
            incompatible_qos: RequestedIncompatibleQosStatus::default(),
            wait_faults: VecDeque::new(),
            unreadable: Vec::new(),
        }
    }

    /// Consume a pending read failure for `status`, if one was injected.
    fn read_fault(&mut self, status: StatusMask) -> Result<(), CloudError> {
        match self.unreadable.iter().position(|(mask, _)| mask.intersects(status)) {
            Some(i) => Err(CloudError::StatusUnavailable(self.unreadable.remove(i).1)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, TopicState>,
    lost: Option<String>,
    refusal: Option<String>,
}

impl State {
    fn topic_mut(&mut self, name: &str) -> &mut TopicState {
        self.topics
            .entry(name.to_string())
            .or_insert_with(TopicState::new)
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WaitSignal for Shared {
    fn notify(&self) {
        // Taking the lock orders this wake-up after any in-progress check.
        let _state = self.lock();
        self.wake.notify_all();
    }
}

/// In-memory session factory.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Loopback {
    shared: Arc<Shared>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher handle for `name`, creating the topic on first use.
    pub fn topic(&self, name: &str) -> LoopbackTopic {
        self.shared.lock().topic_mut(name);
        LoopbackTopic {
            shared: self.shared.clone(),
            name: name.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Failure injection
    // -----------------------------------------------------------------------

    /// Sever every session on every topic; subsequent waits and reads fail
    /// with [`CloudError::SessionLost`].
    pub fn lose_session(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "loopback session lost");
        self.shared.lock().lost = Some(reason);
        self.shared.wake.notify_all();
    }

    /// Make [`SessionFactory::create_session`] fail with `reason`.
    pub fn refuse_sessions(&self, reason: impl Into<String>) {
        self.shared.lock().refusal = Some(reason.into());
    }
}

/// Publisher side of one loopback topic.  Clones publish to the same topic.
#[derive(Debug, Clone)]
pub struct LoopbackTopic {
    shared: Arc<Shared>,
    name: String,
}

impl LoopbackTopic {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The reader status condition handed out with every session on this
    /// topic.
    pub fn status_condition(&self) -> Condition {
        Condition::Status {
            id: self.shared.lock().topic_mut(&self.name).status_condition,
        }
    }

    /// Samples queued and not yet taken.
    pub fn pending_samples(&self) -> usize {
        self.shared.lock().topic_mut(&self.name).queue.len()
    }

    fn update(&self, f: impl FnOnce(&mut TopicState)) {
        let mut state = self.shared.lock();
        f(state.topic_mut(&self.name));
        self.shared.wake.notify_all();
    }

    /// Queue an ordinary data sample.
    pub fn publish(&self, msg: PointCloudMessage) {
        self.publish_with_info(msg, SampleInfo::data());
    }

    /// Queue a sample with explicit metadata, e.g. a disposal notice.
    pub fn publish_with_info(&self, msg: PointCloudMessage, info: SampleInfo) {
        self.update(|t| {
            t.queue.push_back((msg, info));
            t.changes.insert(StatusMask::DATA_AVAILABLE);
        });
    }

    /// A publisher matched the reader.
    pub fn match_publisher(&self) {
        self.update(|t| {
            t.matched.total_count += 1;
            t.matched.total_count_change += 1;
            t.matched.current_count += 1;
            t.matched.current_count_change += 1;
            t.changes.insert(StatusMask::SUBSCRIPTION_MATCHED);
        });
    }

    /// A previously matched publisher went away.
    pub fn unmatch_publisher(&self) {
        self.update(|t| {
            t.matched.current_count -= 1;
            t.matched.current_count_change -= 1;
            t.changes.insert(StatusMask::SUBSCRIPTION_MATCHED);
        });
    }

    pub fn miss_deadline(&self, count: i32) {
        self.update(|t| {
            t.deadline.total_count += count;
            t.deadline.total_count_change += count;
            t.changes.insert(StatusMask::REQUESTED_DEADLINE_MISSED);
        });
    }

    /// Shift writer liveliness by the given amounts.
    pub fn change_liveliness(&self, alive_delta: i32, not_alive_delta: i32) {
        self.update(|t| {
            t.liveliness.alive_count += alive_delta;
            t.liveliness.alive_count_change += alive_delta;
            t.liveliness.not_alive_count += not_alive_delta;
            t.liveliness.not_alive_count_change += not_alive_delta;
            t.changes.insert(StatusMask::LIVELINESS_CHANGED);
        });
    }

    /// A publisher offered QoS incompatible with `policy_id`.
    pub fn offer_incompatible_qos(&self, policy_id: u32) {
        self.update(|t| {
            t.incompatible_qos.total_count += 1;
            t.incompatible_qos.total_count_change += 1;
            t.incompatible_qos.last_policy_id = policy_id;
            t.changes.insert(StatusMask::REQUESTED_INCOMPATIBLE_QOS);
        });
    }

    /// Make the next wait on this topic return [`CloudError::WaitFailure`].
    pub fn fail_next_wait(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(|t| t.wait_faults.push_back(reason));
    }

    /// Make the next read of `status` return
    /// [`CloudError::StatusUnavailable`].  The status keeps its changes and
    /// its bit, so a later read succeeds.
    pub fn fail_status_read(&self, status: StatusMask, reason: impl Into<String>) {
        let reason = reason.into();
        self.shared
            .lock()
            .topic_mut(&self.name)
            .unreadable
            .push((status, reason));
    }
}

impl SessionFactory for Loopback {
    fn create_session(&self, topic: &str) -> Result<SubscriptionSession, CloudError> {
        let status_condition = {
            let mut state = self.shared.lock();
            if let Some(reason) = &state.refusal {
                return Err(CloudError::SessionBootstrap(format!(
                    "topic {topic}: {reason}"
                )));
            }
            state.topic_mut(topic).status_condition
        };

        let terminate = GuardCondition::new();
        let signal: Arc<dyn WaitSignal> = self.shared.clone();
        terminate.attach_signal(&signal);
        debug!(%topic, guard = terminate.id(), "loopback session created");

        Ok(SubscriptionSession {
            topic: topic.to_string(),
            reader: Box::new(LoopbackReader {
                shared: self.shared.clone(),
                topic: topic.to_string(),
            }),
            status_condition: Condition::Status {
                id: status_condition,
            },
            conditions: Box::new(LoopbackWaitSet {
                shared: self.shared.clone(),
                topic: topic.to_string(),
                status_condition,
                terminate: terminate.clone(),
            }),
            terminate,
        })
    }
}

struct LoopbackReader {
    shared: Arc<Shared>,
    topic: String,
}

impl LoopbackReader {
    /// Run `f` on this reader's topic, failing once the session has been
    /// lost.
    fn with_topic<T>(&self, f: impl FnOnce(&mut TopicState) -> T) -> Result<T, CloudError> {
        let mut state = self.shared.lock();
        if let Some(reason) = &state.lost {
            return Err(CloudError::SessionLost(reason.clone()));
        }
        Ok(f(state.topic_mut(&self.topic)))
    }
}

impl PointCloudReader for LoopbackReader {
    fn status_changes(&mut self) -> Result<StatusMask, CloudError> {
        self.with_topic(|t| t.changes)
    }

    fn subscription_matched_status(&mut self) -> Result<SubscriptionMatchedStatus, CloudError> {
        self.with_topic(|t| -> Result<_, CloudError> {
            t.read_fault(StatusMask::SUBSCRIPTION_MATCHED)?;
            let status = t.matched;
            t.matched.total_count_change = 0;
            t.matched.current_count_change = 0;
            t.changes.remove(StatusMask::SUBSCRIPTION_MATCHED);
            Ok(status)
        })?
    }

    fn requested_deadline_missed_status(
        &mut self,
    ) -> Result<RequestedDeadlineMissedStatus, CloudError> {
        self.with_topic(|t| -> Result<_, CloudError> {
            t.read_fault(StatusMask::REQUESTED_DEADLINE_MISSED)?;
            let status = t.deadline;
            t.deadline.total_count_change = 0;
            t.changes.remove(StatusMask::REQUESTED_DEADLINE_MISSED);
            Ok(status)
        })?
    }

    fn liveliness_changed_status(&mut self) -> Result<LivelinessChangedStatus, CloudError> {
        self.with_topic(|t| -> Result<_, CloudError> {
            t.read_fault(StatusMask::LIVELINESS_CHANGED)?;
            let status = t.liveliness;
            t.liveliness.alive_count_change = 0;
            t.liveliness.not_alive_count_change = 0;
            t.changes.remove(StatusMask::LIVELINESS_CHANGED);
            Ok(status)
        })?
    }

    fn requested_incompatible_qos_status(
        &mut self,
    ) -> Result<RequestedIncompatibleQosStatus, CloudError> {
        self.with_topic(|t| -> Result<_, CloudError> {
            t.read_fault(StatusMask::REQUESTED_INCOMPATIBLE_QOS)?;
            let status = t.incompatible_qos;
            t.incompatible_qos.total_count_change = 0;
            t.changes.remove(StatusMask::REQUESTED_INCOMPATIBLE_QOS);
            Ok(status)
        })?
    }

    fn take_next_sample(&mut self) -> Result<Option<(PointCloudMessage, SampleInfo)>, CloudError> {
        self.with_topic(|t| {
            let sample = t.queue.pop_front();
            if t.queue.is_empty() {
                t.changes.remove(StatusMask::DATA_AVAILABLE);
            }
            sample
        })
    }
}

struct LoopbackWaitSet {
    shared: Arc<Shared>,
    topic: String,
    status_condition: ConditionId,
    terminate: GuardCondition,
}

impl ConditionSet for LoopbackWaitSet {
    fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<Condition>, CloudError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();
        loop {
            if let Some(reason) = &state.lost {
                return Err(CloudError::SessionLost(reason.clone()));
            }

            let topic = state.topic_mut(&self.topic);
            if let Some(reason) = topic.wait_faults.pop_front() {
                return Err(CloudError::WaitFailure(reason));
            }

            let mut triggered = Vec::with_capacity(2);
            if !topic.changes.is_empty() {
                triggered.push(Condition::Status {
                    id: self.status_condition,
                });
            }
            if self.terminate.trigger_value() {
                triggered.push(self.terminate.condition());
            }
            if !triggered.is_empty() {
                return Ok(triggered);
            }

            state = match deadline {
                None => self
                    .shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Vec::new());
                    }
                    self.shared
                        .wake
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}
