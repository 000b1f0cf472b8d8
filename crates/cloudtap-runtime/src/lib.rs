//! `cloudtap-runtime` – process-level glue around the dispatch loop.
//!
//! # Modules
//!
//! - [`subscriber`] – [`Subscriber`][subscriber::Subscriber]: runs one
//!   [`DispatchLoop`][cloudtap_middleware::DispatchLoop] on a dedicated thread
//!   and stops it through the session's terminate guard.
//!   [`SubscriptionManager`][subscriber::SubscriptionManager] keeps one
//!   subscriber per topic.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable trace export.

pub mod subscriber;
pub mod telemetry;

pub use subscriber::{Subscriber, SubscriptionManager};
pub use telemetry::{TracerProviderGuard, init_tracing};
