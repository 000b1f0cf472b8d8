//! Sample drain.
//!
//! On a data-available wake-up the drain takes samples one by one until the
//! reader reports an empty queue or an error.  Samples that only announce an
//! instance lifecycle transition are discarded; every other sample is handed
//! whole, in arrival order, to the caller.
//!
//! With a per-wake limit the drain stops early and reports itself as not
//! exhausted, so the caller can come back on the next iteration.

use std::num::NonZeroUsize;

use cloudtap_types::{CloudError, PointCloudMessage};
use tracing::trace;

use crate::session::PointCloudReader;

/// What one drain pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub taken: usize,
    pub accepted: usize,
    /// Lifecycle-only samples that were dropped.
    pub discarded: usize,
    /// `false` when the per-wake limit stopped the pass with samples left.
    pub exhausted: bool,
    /// The error that ended the pass, if any.
    pub error: Option<CloudError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleDrain {
    limit: Option<NonZeroUsize>,
}

impl SampleDrain {
    /// Take at most `limit` samples per pass; `None` drains until empty.
    pub fn new(limit: Option<NonZeroUsize>) -> Self {
        Self { limit }
    }

    /// Take samples from `reader`, passing every usable one to `accept`.
    pub fn drain<F>(&self, reader: &mut dyn PointCloudReader, mut accept: F) -> DrainReport
    where
        F: FnMut(PointCloudMessage),
    {
        let mut report = DrainReport::default();
        loop {
            if let Some(limit) = self.limit
                && report.taken >= limit.get()
            {
                trace!(taken = report.taken, "drain limit reached");
                return report;
            }
            match reader.take_next_sample() {
                Ok(Some((msg, info))) => {
                    report.taken += 1;
                    if info.is_usable() {
                        report.accepted += 1;
                        accept(msg);
                    } else {
                        report.discarded += 1;
                        trace!(state = ?info.instance_state, "discarding lifecycle sample");
                    }
                }
                Ok(None) => {
                    report.exhausted = true;
                    return report;
                }
                Err(e) => {
                    report.exhausted = true;
                    report.error = Some(e);
                    return report;
                }
            }
        }
    }
}
