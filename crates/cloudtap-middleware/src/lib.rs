//! `cloudtap-middleware` – subscription plumbing.
//!
//! Everything between the publish/subscribe session and the output sink:
//! waiting on conditions, classifying status changes, draining samples and
//! routing decoded batches.
//!
//! # Modules
//!
//! - [`status`] – [`StatusMask`] bits and the per-status snapshots a reader
//!   reports.
//! - [`condition`] – [`Condition`] handles, the cross-thread
//!   [`GuardCondition`] and the blocking [`ConditionSet`] capability.
//! - [`session`] – [`PointCloudReader`], [`SubscriptionSession`] and the
//!   [`SessionFactory`] capability a concrete middleware binding provides.
//! - [`loopback`] – in-process [`Loopback`] topics for tests and demos.
//! - [`classifier`] – fans a status bitmask out into independent snapshots
//!   and notifications.
//! - [`drain`] – [`SampleDrain`]: pulls queued samples, filtering lifecycle
//!   events.
//! - [`dispatch`] – [`DispatchLoop`]: the wait → classify → drain → decode →
//!   emit driver.
//! - [`bus`] / [`sink`] – [`OutputSink`] implementations, including a Tokio
//!   broadcast [`EventBus`] for asynchronous consumers.

pub mod bus;
pub mod classifier;
pub mod condition;
pub mod dispatch;
pub mod drain;
pub mod loopback;
pub mod session;
pub mod sink;
pub mod status;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use condition::{Condition, ConditionId, ConditionSet, GuardCondition, WaitSignal};
pub use dispatch::{DispatchConfig, DispatchLoop, DispatchStats, LoopControl};
pub use drain::{DrainReport, SampleDrain};
pub use loopback::{Loopback, LoopbackTopic};
pub use session::{InstanceState, PointCloudReader, SampleInfo, SessionFactory, SubscriptionSession};
pub use sink::{BusSink, CollectingSink, OutputSink};
pub use status::{StatusMask, StatusSnapshot};
