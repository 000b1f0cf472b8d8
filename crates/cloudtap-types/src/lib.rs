use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single decoded attribute value, kept in the width it was encoded with.
///
/// Serialises as a bare JSON number so downstream consumers see plain
/// `{"x": 1.0, ...}` records.  A bare number no longer carries its encoded
/// width, so deserialising yields the widest variant of its kind: `I64` for
/// negative integers, `U64` for non-negative ones and `F64` for floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    F32(f32),
    F64(f64),
    I64(i64),
    U64(u64),
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScalarVisitor;

        impl Visitor<'_> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Scalar, E> {
                Ok(Scalar::I64(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Scalar, E> {
                Ok(Scalar::U64(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Scalar, E> {
                Ok(Scalar::F64(v))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// One decoded point.  An attribute is `None` when its datatype code is not
/// recognised or its bytes fall outside the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub x: Option<Scalar>,
    pub y: Option<Scalar>,
    pub z: Option<Scalar>,
    pub r: Option<Scalar>,
    pub g: Option<Scalar>,
    pub b: Option<Scalar>,
}

/// Self-describing layout entry of a point cloud sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointField {
    /// Semantic tag: `1 = X`, `2 = Y`, `3 = Z`, `8 = packed color`.
    pub format_label: u8,
    /// Offset of the value from the start of each point, in bytes.
    pub byte_offset: u32,
    /// Scalar datatype code (`1..=8`).
    pub datatype: u8,
}

/// A raw point cloud sample as delivered by the middleware.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCloudMessage {
    pub fields: Vec<PointField>,
    /// Bytes per point.
    pub point_stride: u32,
    pub payload: Vec<u8>,
}

/// Decoded points of one sample, tagged with its arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointBatch {
    /// Monotonic per-subscription arrival counter, starting at 0.
    pub sequence: u64,
    pub topic: String,
    pub points: Vec<PointRecord>,
}

/// Structured status report handed to the output sink.
///
/// `Display` renders the human-readable line shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    PeerMatched,
    PeerUnmatched,
    DeadlineMissed { total_delta: i32 },
    LivelinessRecovered { alive_delta: i32 },
    LivelinessLost { not_alive_delta: i32 },
    IncompatibleQos { total_delta: i32, last_policy_id: u32 },
    /// A sample was taken but could not be decoded.
    SampleSkipped { sequence: u64, error: CloudError },
    /// A non-fatal error raised while servicing a wake-up.
    Fault { error: CloudError },
    /// The terminate condition fired; the loop stops after this wake-up.
    ShutdownRequested,
}

/// Coarse severity used for log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Notification {
    pub fn severity(&self) -> Severity {
        match self {
            Notification::PeerMatched
            | Notification::PeerUnmatched
            | Notification::LivelinessRecovered { .. }
            | Notification::ShutdownRequested => Severity::Info,
            Notification::DeadlineMissed { .. }
            | Notification::LivelinessLost { .. }
            | Notification::IncompatibleQos { .. } => Severity::Warning,
            Notification::SampleSkipped { .. } | Notification::Fault { .. } => Severity::Error,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::PeerMatched => write!(f, "DataReader matched with publisher."),
            Notification::PeerUnmatched => write!(f, "DataReader unmatched with publisher."),
            Notification::DeadlineMissed { .. } => write!(f, "DataReader detects deadline missed."),
            Notification::LivelinessRecovered { .. } => {
                write!(f, "DataReader detects liveliness recovered.")
            }
            Notification::LivelinessLost { .. } => write!(f, "DataReader detects liveliness lost."),
            Notification::IncompatibleQos { .. } => write!(f, "DataReader requested incompatible QoS."),
            Notification::SampleSkipped { sequence, error } => {
                write!(f, "Skipped point cloud sample {sequence}: {error}")
            }
            Notification::Fault { error } => write!(f, "{error}"),
            Notification::ShutdownRequested => {
                write!(f, "Terminate condition triggered; stopping subscriber.")
            }
        }
    }
}

/// Unified event wrapper handed to output sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "cloudtap-middleware::dispatch"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed to output sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    PointCloud(PointBatch),
    Status(Notification),
}

/// Global error type spanning session faults, wait failures, and malformed samples.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudError {
    #[error("Error waiting for conditions: {0}")]
    WaitFailure(String),

    #[error("{delta} is not a valid value for {status} current count change")]
    InvalidStatusDelta { status: String, delta: i32 },

    #[error("Field with format {label} not found")]
    FieldNotFound { label: u8 },

    #[error("Invalid point stride: {0}")]
    InvalidPointStride(u32),

    #[error("Session Bootstrap Failure: {0}")]
    SessionBootstrap(String),

    #[error("Session Lost: {0}")]
    SessionLost(String),

    #[error("Status Unavailable: {0}")]
    StatusUnavailable(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl CloudError {
    /// `true` for faults that must terminate the dispatch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CloudError::SessionLost(_) | CloudError::SessionBootstrap(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_serialises_as_bare_number() {
        assert_eq!(serde_json::to_string(&Scalar::F32(1.5)).unwrap(), "1.5");
        assert_eq!(serde_json::to_string(&Scalar::I32(-1)).unwrap(), "-1");
        assert_eq!(serde_json::to_string(&Scalar::U8(255)).unwrap(), "255");
    }

    #[test]
    fn scalar_deserialises_to_widest_variant() {
        let cases = [
            (Scalar::F64(0.1), Scalar::F64(0.1)),
            (Scalar::F32(1.5), Scalar::F64(1.5)),
            (Scalar::U32(5), Scalar::U64(5)),
            (Scalar::U16(300), Scalar::U64(300)),
            (Scalar::I8(-7), Scalar::I64(-7)),
            (Scalar::U32(u32::MAX), Scalar::U64(4_294_967_295)),
        ];
        for (value, expected) in cases {
            let json = serde_json::to_string(&value).unwrap();
            let back: Scalar = serde_json::from_str(&json).unwrap();
            assert_eq!(back, expected, "{value:?} via {json}");
        }
        assert!(serde_json::from_str::<Scalar>("\"1\"").is_err());
    }

    #[test]
    fn absent_attribute_serialises_as_null() {
        let point = PointRecord {
            x: Some(Scalar::F32(1.0)),
            ..PointRecord::default()
        };
        let json = serde_json::to_string(&point).unwrap();
        assert!(json.contains("\"x\":1.0"));
        assert!(json.contains("\"r\":null"));
    }

    #[test]
    fn notification_display_matches_operator_messages() {
        assert_eq!(
            Notification::PeerMatched.to_string(),
            "DataReader matched with publisher."
        );
        assert_eq!(
            Notification::LivelinessLost { not_alive_delta: 1 }.to_string(),
            "DataReader detects liveliness lost."
        );
        let invalid = Notification::Fault {
            error: CloudError::InvalidStatusDelta {
                status: "SubscriptionMatchedStatus".to_string(),
                delta: 2,
            },
        };
        assert_eq!(
            invalid.to_string(),
            "2 is not a valid value for SubscriptionMatchedStatus current count change"
        );
    }

    #[test]
    fn notification_json_is_tagged_by_kind() {
        let json = serde_json::to_string(&Notification::DeadlineMissed { total_delta: 3 }).unwrap();
        assert!(json.contains("\"kind\":\"deadline_missed\""));
        assert!(json.contains("\"total_delta\":3"));

        let json = serde_json::to_string(&Notification::SampleSkipped {
            sequence: 7,
            error: CloudError::FieldNotFound { label: 8 },
        })
        .unwrap();
        assert!(json.contains("sample_skipped"));
        assert!(json.contains("FieldNotFound"));
    }

    #[test]
    fn severity_routes_errors() {
        assert_eq!(Notification::PeerUnmatched.severity(), Severity::Info);
        assert_eq!(
            Notification::IncompatibleQos { total_delta: 1, last_policy_id: 0 }.severity(),
            Severity::Warning
        );
        assert_eq!(
            Notification::Fault { error: CloudError::WaitFailure("x".into()) }.severity(),
            Severity::Error
        );
    }

    #[test]
    fn event_roundtrip() {
        let point = PointRecord {
            x: Some(Scalar::F64(0.1)),
            y: Some(Scalar::F32(-2.5)),
            z: Some(Scalar::I32(-3)),
            r: Some(Scalar::U8(200)),
            g: Some(Scalar::U16(300)),
            b: None,
        };
        let event = Event::new(
            "cloudtap-middleware::dispatch",
            EventPayload::PointCloud(PointBatch {
                sequence: 4,
                topic: "lidar".to_string(),
                points: vec![point],
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);

        let EventPayload::PointCloud(batch) = back.payload else {
            panic!("expected a point cloud payload");
        };
        assert_eq!(batch.sequence, 4);
        assert_eq!(
            batch.points,
            vec![PointRecord {
                x: Some(Scalar::F64(0.1)),
                y: Some(Scalar::F64(-2.5)),
                z: Some(Scalar::I64(-3)),
                r: Some(Scalar::U64(200)),
                g: Some(Scalar::U64(300)),
                b: None,
            }]
        );
    }

    #[test]
    fn only_session_faults_are_fatal() {
        assert!(CloudError::SessionLost("gone".into()).is_fatal());
        assert!(!CloudError::WaitFailure("timeout".into()).is_fatal());
        assert!(!CloudError::FieldNotFound { label: 1 }.is_fatal());
    }

    #[test]
    fn field_not_found_display() {
        let err = CloudError::FieldNotFound { label: 3 };
        assert_eq!(err.to_string(), "Field with format 3 not found");
    }
}
