//! Communication status bits and snapshots.
//!
//! A reader's status condition carries a [`StatusMask`] of the statuses that
//! changed since they were last read.  Several bits may be set at once.
//! Reading a status through the reader resets its `*_change` counters and
//! clears its bit.

use std::ops::BitOr;

/// Bit set of communication statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StatusMask(u32);

impl StatusMask {
    pub const DATA_AVAILABLE: StatusMask = StatusMask(1 << 0);
    pub const LIVELINESS_CHANGED: StatusMask = StatusMask(1 << 3);
    pub const REQUESTED_DEADLINE_MISSED: StatusMask = StatusMask(1 << 4);
    pub const REQUESTED_INCOMPATIBLE_QOS: StatusMask = StatusMask(1 << 5);
    pub const SUBSCRIPTION_MATCHED: StatusMask = StatusMask(1 << 6);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// `true` when every bit of `other` is set in `self`.
    pub const fn contains(self, other: StatusMask) -> bool {
        (self.0 & other.0) == other.0
    }

    /// `true` when `self` and `other` share at least one bit.
    pub const fn intersects(self, other: StatusMask) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: StatusMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: StatusMask) {
        self.0 &= !other.0;
    }
}

impl BitOr for StatusMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        StatusMask(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    pub total_count: i32,
    pub total_count_change: i32,
    pub current_count: i32,
    pub current_count_change: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedDeadlineMissedStatus {
    pub total_count: i32,
    pub total_count_change: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LivelinessChangedStatus {
    pub alive_count: i32,
    pub not_alive_count: i32,
    pub alive_count_change: i32,
    pub not_alive_count_change: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestedIncompatibleQosStatus {
    pub total_count: i32,
    pub total_count_change: i32,
    pub last_policy_id: u32,
}

/// The part of a status that the dispatch loop acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSnapshot {
    SubscriptionMatched { delta: i32 },
    DeadlineMissed { total_delta: i32 },
    LivelinessChanged { alive_delta: i32, not_alive_delta: i32 },
    IncompatibleQos { total_delta: i32, last_policy_id: u32 },
    DataAvailable,
}

impl From<SubscriptionMatchedStatus> for StatusSnapshot {
    fn from(s: SubscriptionMatchedStatus) -> Self {
        StatusSnapshot::SubscriptionMatched {
            delta: s.current_count_change,
        }
    }
}

impl From<RequestedDeadlineMissedStatus> for StatusSnapshot {
    fn from(s: RequestedDeadlineMissedStatus) -> Self {
        StatusSnapshot::DeadlineMissed {
            total_delta: s.total_count_change,
        }
    }
}

impl From<LivelinessChangedStatus> for StatusSnapshot {
    fn from(s: LivelinessChangedStatus) -> Self {
        StatusSnapshot::LivelinessChanged {
            alive_delta: s.alive_count_change,
            not_alive_delta: s.not_alive_count_change,
        }
    }
}

impl From<RequestedIncompatibleQosStatus> for StatusSnapshot {
    fn from(s: RequestedIncompatibleQosStatus) -> Self {
        StatusSnapshot::IncompatibleQos {
            total_delta: s.total_count_change,
            last_policy_id: s.last_policy_id,
        }
    }
}
