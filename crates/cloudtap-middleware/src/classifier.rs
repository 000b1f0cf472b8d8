//! Status classification.
//!
//! One wake-up of a status condition may carry several status bits at once.
//! [`classify`] walks the [`RECOGNIZED_STATUSES`] table, testing each bit on
//! its own and fetching the matching snapshot.  [`notifications`] then turns
//! each snapshot into zero or more [`Notification`]s.
//!
//! Classification never blocks.

use cloudtap_types::{CloudError, Notification};
use tracing::trace;

use crate::session::PointCloudReader;
use crate::status::{StatusMask, StatusSnapshot};

/// A status kind the dispatch loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    SubscriptionMatched,
    DeadlineMissed,
    LivelinessChanged,
    IncompatibleQos,
    DataAvailable,
}

/// Every recognised status, in the order it is checked.
pub const RECOGNIZED_STATUSES: [StatusKind; 5] = [
    StatusKind::SubscriptionMatched,
    StatusKind::DeadlineMissed,
    StatusKind::LivelinessChanged,
    StatusKind::IncompatibleQos,
    StatusKind::DataAvailable,
];

impl StatusKind {
    pub fn mask(self) -> StatusMask {
        match self {
            StatusKind::SubscriptionMatched => StatusMask::SUBSCRIPTION_MATCHED,
            StatusKind::DeadlineMissed => StatusMask::REQUESTED_DEADLINE_MISSED,
            StatusKind::LivelinessChanged => StatusMask::LIVELINESS_CHANGED,
            StatusKind::IncompatibleQos => StatusMask::REQUESTED_INCOMPATIBLE_QOS,
            StatusKind::DataAvailable => StatusMask::DATA_AVAILABLE,
        }
    }

    /// Fetch the snapshot of this status from `reader`.
    ///
    /// Data availability has no counters; fetching it never touches the
    /// reader.
    pub fn snapshot(self, reader: &mut dyn PointCloudReader) -> Result<StatusSnapshot, CloudError> {
        match self {
            StatusKind::SubscriptionMatched => reader.subscription_matched_status().map(Into::into),
            StatusKind::DeadlineMissed => reader.requested_deadline_missed_status().map(Into::into),
            StatusKind::LivelinessChanged => reader.liveliness_changed_status().map(Into::into),
            StatusKind::IncompatibleQos => {
                reader.requested_incompatible_qos_status().map(Into::into)
            }
            StatusKind::DataAvailable => Ok(StatusSnapshot::DataAvailable),
        }
    }
}

/// Outcome of classifying one status wake-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// One entry per active status, in table order.  A status whose bit was
    /// set but whose snapshot could not be read holds the read error.
    pub outcomes: Vec<Result<StatusSnapshot, CloudError>>,
}

impl Classification {
    pub fn data_available(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o, Ok(StatusSnapshot::DataAvailable)))
    }
}

/// Read the reader's changed statuses and snapshot each active one.
///
/// A snapshot that fails to read is kept in place as an `Err` outcome and
/// the remaining bits are still checked.
///
/// # Errors
///
/// Fails when the change mask itself cannot be read, or when any read
/// reports a fatal error.
pub fn classify(reader: &mut dyn PointCloudReader) -> Result<Classification, CloudError> {
    let changes = reader.status_changes()?;
    trace!(changes = changes.bits(), "classifying status wake-up");

    let mut classification = Classification::default();
    for kind in RECOGNIZED_STATUSES {
        if !changes.contains(kind.mask()) {
            continue;
        }
        match kind.snapshot(reader) {
            Err(e) if e.is_fatal() => return Err(e),
            outcome => classification.outcomes.push(outcome),
        }
    }
    Ok(classification)
}

/// Notifications reported for `snapshot`.
///
/// Data availability produces none; it is serviced by the sample drain.
pub fn notifications(snapshot: &StatusSnapshot) -> Vec<Notification> {
    match *snapshot {
        StatusSnapshot::SubscriptionMatched { delta: 1 } => vec![Notification::PeerMatched],
        StatusSnapshot::SubscriptionMatched { delta: -1 } => vec![Notification::PeerUnmatched],
        StatusSnapshot::SubscriptionMatched { delta } => vec![Notification::Fault {
            error: CloudError::InvalidStatusDelta {
                status: "SubscriptionMatchedStatus".to_string(),
                delta,
            },
        }],
        StatusSnapshot::DeadlineMissed { total_delta } if total_delta > 0 => {
            vec![Notification::DeadlineMissed { total_delta }]
        }
        StatusSnapshot::DeadlineMissed { .. } => Vec::new(),
        StatusSnapshot::LivelinessChanged {
            alive_delta,
            not_alive_delta,
        } => {
            let mut out = Vec::with_capacity(2);
            if alive_delta > 0 {
                out.push(Notification::LivelinessRecovered { alive_delta });
            }
            if not_alive_delta > 0 {
                out.push(Notification::LivelinessLost { not_alive_delta });
            }
            out
        }
        StatusSnapshot::IncompatibleQos {
            total_delta,
            last_policy_id,
        } => vec![Notification::IncompatibleQos {
            total_delta,
            last_policy_id,
        }],
        StatusSnapshot::DataAvailable => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::Loopback;
    use crate::session::SessionFactory;

    #[test]
    fn match_deltas() {
        assert_eq!(
            notifications(&StatusSnapshot::SubscriptionMatched { delta: 1 }),
            vec![Notification::PeerMatched]
        );
        assert_eq!(
            notifications(&StatusSnapshot::SubscriptionMatched { delta: -1 }),
            vec![Notification::PeerUnmatched]
        );
        let invalid = notifications(&StatusSnapshot::SubscriptionMatched { delta: 2 });
        assert_eq!(invalid.len(), 1);
        assert_eq!(
            invalid[0].to_string(),
            "2 is not a valid value for SubscriptionMatchedStatus current count change"
        );
        assert_eq!(notifications(&StatusSnapshot::SubscriptionMatched { delta: 0 }).len(), 1);
    }

    #[test]
    fn deadline_reported_only_when_positive() {
        assert!(notifications(&StatusSnapshot::DeadlineMissed { total_delta: 0 }).is_empty());
        assert_eq!(
            notifications(&StatusSnapshot::DeadlineMissed { total_delta: 3 }),
            vec![Notification::DeadlineMissed { total_delta: 3 }]
        );
    }

    #[test]
    fn liveliness_checks_both_deltas() {
        let both = notifications(&StatusSnapshot::LivelinessChanged {
            alive_delta: 1,
            not_alive_delta: 1,
        });
        assert_eq!(
            both,
            vec![
                Notification::LivelinessRecovered { alive_delta: 1 },
                Notification::LivelinessLost { not_alive_delta: 1 },
            ]
        );
        assert!(
            notifications(&StatusSnapshot::LivelinessChanged {
                alive_delta: -1,
                not_alive_delta: 0,
            })
            .is_empty()
        );
    }

    #[test]
    fn incompatible_qos_is_unconditional() {
        let out = notifications(&StatusSnapshot::IncompatibleQos {
            total_delta: 0,
            last_policy_id: 11,
        });
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn classify_fans_out_every_active_bit() {
        let loopback = Loopback::new();
        let mut session = loopback.create_session("t").unwrap();
        let topic = loopback.topic("t");
        topic.match_publisher();
        topic.change_liveliness(1, 0);
        topic.publish(Default::default());

        let c = classify(session.reader.as_mut()).unwrap();
        assert_eq!(
            c.outcomes,
            vec![
                Ok(StatusSnapshot::SubscriptionMatched { delta: 1 }),
                Ok(StatusSnapshot::LivelinessChanged {
                    alive_delta: 1,
                    not_alive_delta: 0,
                }),
                Ok(StatusSnapshot::DataAvailable),
            ]
        );
        assert!(c.data_available());

        // Status bits were consumed; data stays available until taken.
        let again = classify(session.reader.as_mut()).unwrap();
        assert_eq!(again.outcomes, vec![Ok(StatusSnapshot::DataAvailable)]);
    }

    #[test]
    fn unreadable_status_keeps_its_place() {
        let loopback = Loopback::new();
        let mut session = loopback.create_session("t").unwrap();
        let topic = loopback.topic("t");
        topic.match_publisher();
        topic.miss_deadline(1);
        topic.change_liveliness(0, 1);
        topic.fail_status_read(StatusMask::REQUESTED_DEADLINE_MISSED, "busy");

        let c = classify(session.reader.as_mut()).unwrap();
        assert_eq!(
            c.outcomes,
            vec![
                Ok(StatusSnapshot::SubscriptionMatched { delta: 1 }),
                Err(CloudError::StatusUnavailable("busy".into())),
                Ok(StatusSnapshot::LivelinessChanged {
                    alive_delta: 0,
                    not_alive_delta: 1,
                }),
            ]
        );
        assert!(!c.data_available());
    }

    #[test]
    fn classify_propagates_lost_session() {
        let loopback = Loopback::new();
        let mut session = loopback.create_session("t").unwrap();
        loopback.lose_session("gone");
        assert_eq!(
            classify(session.reader.as_mut()),
            Err(CloudError::SessionLost("gone".into()))
        );
    }
}
