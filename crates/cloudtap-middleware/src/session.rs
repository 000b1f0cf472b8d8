//! Session capabilities.
//!
//! The dispatch core never touches a concrete middleware.  A binding hands
//! it a [`SubscriptionSession`] – a reader, the reader's status condition,
//! the condition set to block on and the terminate guard – through the
//! [`SessionFactory`] trait.  Creating participants, topics and QoS
//! profiles is the binding's business.

use cloudtap_types::{CloudError, PointCloudMessage};

use crate::condition::{Condition, ConditionSet, GuardCondition};
use crate::status::{
    LivelinessChangedStatus, RequestedDeadlineMissedStatus, RequestedIncompatibleQosStatus,
    StatusMask, SubscriptionMatchedStatus,
};

/// Lifecycle state of the instance a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

/// Per-sample metadata returned alongside every taken sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub instance_state: InstanceState,
    /// `false` for samples that only announce a lifecycle transition.
    pub valid_data: bool,
}

impl SampleInfo {
    /// Metadata of an ordinary data sample.
    pub const fn data() -> Self {
        Self {
            instance_state: InstanceState::Alive,
            valid_data: true,
        }
    }

    /// `true` when the sample carries decodable data.
    pub fn is_usable(&self) -> bool {
        self.instance_state == InstanceState::Alive && self.valid_data
    }
}

/// Reader capability consumed by the dispatch loop.
///
/// All calls are expected to return promptly; only
/// [`ConditionSet::wait`] blocks.
pub trait PointCloudReader: Send {
    /// Statuses that changed since they were last read.
    fn status_changes(&mut self) -> Result<StatusMask, CloudError>;

    fn subscription_matched_status(&mut self) -> Result<SubscriptionMatchedStatus, CloudError>;

    fn requested_deadline_missed_status(
        &mut self,
    ) -> Result<RequestedDeadlineMissedStatus, CloudError>;

    fn liveliness_changed_status(&mut self) -> Result<LivelinessChangedStatus, CloudError>;

    fn requested_incompatible_qos_status(
        &mut self,
    ) -> Result<RequestedIncompatibleQosStatus, CloudError>;

    /// Remove and return the oldest queued sample, or `Ok(None)` when the
    /// queue is empty.
    fn take_next_sample(&mut self) -> Result<Option<(PointCloudMessage, SampleInfo)>, CloudError>;
}

/// Everything the dispatch loop needs from one subscription.
pub struct SubscriptionSession {
    pub topic: String,
    pub reader: Box<dyn PointCloudReader>,
    /// The reader's status condition, as reported by `conditions`.
    pub status_condition: Condition,
    pub conditions: Box<dyn ConditionSet>,
    /// Raising this guard stops the loop after its current wake-up.
    pub terminate: GuardCondition,
}

impl std::fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("topic", &self.topic)
            .field("status_condition", &self.status_condition)
            .field("terminate", &self.terminate)
            .finish_non_exhaustive()
    }
}

/// Bootstraps subscriptions on a concrete middleware.
pub trait SessionFactory: Send + Sync {
    /// Create a reader on `topic` together with its wait primitives.
    ///
    /// # Errors
    ///
    /// [`CloudError::SessionBootstrap`] when any part of the setup fails.
    /// The caller must not start a dispatch loop in that case.
    fn create_session(&self, topic: &str) -> Result<SubscriptionSession, CloudError>;
}
