//! [`DispatchLoop`] – the status-dispatch driver.
//!
//! # Iteration
//!
//! ```text
//! wait(conditions)                      // only blocking call
//!   ├─ guard condition   → request shutdown
//!   └─ status condition  → classify
//!        ├─ status bits  → notifications → sink
//!        └─ data bit     → drain → (throttle) → decode → batch → sink
//! sleep(idle_sleep)
//! ```
//!
//! Per-iteration errors (failed waits, unreadable statuses, undecodable
//! samples) become [`Notification`]s and the loop carries on.  Only a fatal
//! error ([`CloudError::is_fatal`]) ends [`DispatchLoop::run`] with `Err`.
//!
//! Raising the session's terminate guard stops the loop once the wake-up
//! that observed it has been fully processed.

use std::num::{NonZeroU32, NonZeroUsize};
use std::thread;
use std::time::Duration;

use cloudtap_perception::{ColorOffsets, PointDecoder};
use cloudtap_types::{CloudError, Notification, PointBatch, PointCloudMessage, Severity};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, error, info, warn};

use crate::classifier::{classify, notifications};
use crate::condition::{Condition, GuardCondition};
use crate::drain::SampleDrain;
use crate::session::SubscriptionSession;
use crate::sink::OutputSink;
use crate::status::StatusSnapshot;

/// Tuning knobs of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Pause between iterations.
    pub idle_sleep: Duration,
    /// Samples taken per wake-up before yielding; `None` drains fully.
    pub max_samples_per_wake: Option<NonZeroUsize>,
    /// Decoded batches per second; excess samples are dropped before decode.
    pub max_batches_per_second: Option<NonZeroU32>,
    pub color_offsets: ColorOffsets,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_millis(10),
            max_samples_per_wake: None,
            max_batches_per_second: None,
            color_offsets: ColorOffsets::default(),
        }
    }
}

/// Counters accumulated over the lifetime of one loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub wake_ups: u64,
    pub batches: u64,
    pub points: u64,
    /// Lifecycle-only samples dropped by the drain.
    pub discarded: u64,
    /// Samples that failed to decode.
    pub skipped: u64,
    /// Samples dropped by the batch rate limit.
    pub throttled: u64,
    pub wait_failures: u64,
    pub notifications: u64,
}

/// Whether the loop should keep going after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Decode-and-emit half of the loop.
struct Emitter<S> {
    topic: String,
    sink: S,
    decoder: PointDecoder,
    limiter: Option<DefaultDirectRateLimiter>,
    next_sequence: u64,
    stats: DispatchStats,
}

impl<S: OutputSink> Emitter<S> {
    fn notify(&mut self, notification: Notification) {
        match notification.severity() {
            Severity::Info => info!(topic = %self.topic, "{notification}"),
            Severity::Warning => warn!(topic = %self.topic, "{notification}"),
            Severity::Error => error!(topic = %self.topic, "{notification}"),
        }
        self.stats.notifications += 1;
        self.sink.emit_notification(notification);
    }

    fn process(&mut self, msg: PointCloudMessage) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if let Some(limiter) = &self.limiter
            && limiter.check().is_err()
        {
            self.stats.throttled += 1;
            debug!(sequence, "sample throttled");
            return;
        }

        match self.decoder.decode(&msg) {
            Ok(points) => {
                self.stats.batches += 1;
                self.stats.points += points.len() as u64;
                self.sink.emit_batch(PointBatch {
                    sequence,
                    topic: self.topic.clone(),
                    points,
                });
            }
            Err(error) => {
                self.stats.skipped += 1;
                self.notify(Notification::SampleSkipped { sequence, error });
            }
        }
    }
}

/// Drives one [`SubscriptionSession`], forwarding its output to `S`.
pub struct DispatchLoop<S: OutputSink> {
    session: SubscriptionSession,
    drain: SampleDrain,
    emitter: Emitter<S>,
    idle_sleep: Duration,
    drain_pending: bool,
    cancelled: bool,
}

impl<S: OutputSink> DispatchLoop<S> {
    pub fn new(session: SubscriptionSession, sink: S, config: DispatchConfig) -> Self {
        let limiter = config
            .max_batches_per_second
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self {
            emitter: Emitter {
                topic: session.topic.clone(),
                sink,
                decoder: PointDecoder::new(config.color_offsets),
                limiter,
                next_sequence: 0,
                stats: DispatchStats::default(),
            },
            session,
            drain: SampleDrain::new(config.max_samples_per_wake),
            idle_sleep: config.idle_sleep,
            drain_pending: false,
            cancelled: false,
        }
    }

    /// The guard that stops this loop when raised.
    pub fn terminate_condition(&self) -> GuardCondition {
        self.session.terminate.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.emitter.stats
    }

    /// Run until the terminate guard fires or the session is lost.
    ///
    /// # Errors
    ///
    /// The fatal error that ended the loop.  It has already been reported to
    /// the sink as a [`Notification::Fault`].
    pub fn run(mut self) -> Result<DispatchStats, CloudError> {
        info!(topic = %self.session.topic, "dispatch loop started");
        while self.run_once(None)? == LoopControl::Continue {
            if !self.idle_sleep.is_zero() {
                thread::sleep(self.idle_sleep);
            }
        }
        let stats = self.emitter.stats;
        info!(
            topic = %self.session.topic,
            wake_ups = stats.wake_ups,
            batches = stats.batches,
            points = stats.points,
            skipped = stats.skipped,
            "dispatch loop stopped"
        );
        Ok(stats)
    }

    /// Wait once and service whatever triggered.
    ///
    /// While a bounded drain still has samples queued the wait does not
    /// block and draining resumes regardless of what the wait reports.
    ///
    /// # Errors
    ///
    /// Only fatal errors; everything else is reported to the sink.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<LoopControl, CloudError> {
        let timeout = if self.drain_pending {
            Some(Duration::ZERO)
        } else {
            timeout
        };

        let triggered = match self.session.conditions.wait(timeout) {
            Ok(triggered) => triggered,
            Err(e) => {
                if !e.is_fatal() {
                    self.emitter.stats.wait_failures += 1;
                }
                self.report(e)?;
                return Ok(LoopControl::Continue);
            }
        };
        if !triggered.is_empty() {
            self.emitter.stats.wake_ups += 1;
        }

        let mut data_available = self.drain_pending;
        for condition in triggered {
            match condition {
                Condition::Guard { id } if id == self.session.terminate.id() => {
                    debug!(guard = id, "terminate condition triggered");
                    self.cancelled = true;
                }
                c if c == self.session.status_condition => {
                    data_available |= self.handle_status()?;
                }
                other => warn!(condition = ?other, "wake-up from unknown condition"),
            }
        }

        if data_available {
            self.drain_samples()?;
        }

        if self.cancelled {
            self.emitter.notify(Notification::ShutdownRequested);
            return Ok(LoopControl::Stop);
        }
        Ok(LoopControl::Continue)
    }

    /// Classify a status wake-up and report every status change.  Returns
    /// whether data is available.
    fn handle_status(&mut self) -> Result<bool, CloudError> {
        let classification = match classify(self.session.reader.as_mut()) {
            Ok(c) => c,
            Err(e) => {
                self.report(e)?;
                return Ok(false);
            }
        };
        let mut data_available = false;
        for outcome in classification.outcomes {
            match outcome {
                Ok(StatusSnapshot::DataAvailable) => data_available = true,
                Ok(snapshot) => {
                    for notification in notifications(&snapshot) {
                        self.emitter.notify(notification);
                    }
                }
                Err(error) => self.emitter.notify(Notification::Fault { error }),
            }
        }
        Ok(data_available)
    }

    fn drain_samples(&mut self) -> Result<(), CloudError> {
        let Self {
            session,
            drain,
            emitter,
            ..
        } = &mut *self;
        let report = drain.drain(session.reader.as_mut(), |msg| emitter.process(msg));
        emitter.stats.discarded += report.discarded as u64;
        self.drain_pending = !report.exhausted;

        match report.error {
            Some(e) => self.report(e),
            None => Ok(()),
        }
    }

    /// Report `error` to the sink, returning it when it is fatal.
    fn report(&mut self, error: CloudError) -> Result<(), CloudError> {
        let fatal = error.is_fatal();
        self.emitter.notify(Notification::Fault {
            error: error.clone(),
        });
        if fatal { Err(error) } else { Ok(()) }
    }
}
