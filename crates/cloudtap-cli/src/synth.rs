//! Built-in synthetic publisher.
//!
//! Publishes a slowly rotating, colored spiral onto a [`LoopbackTopic`] so the
//! binary produces output without an external middleware.
//!
//! Frame layout (32-byte stride):
//!
//! | Offset | Field | Datatype |
//! |---|---|---|
//! | 0 / 4 / 8 | X / Y / Z | float32 |
//! | 12 / 20 / 28 | R / G / B | uint8 (packed color field at 12) |
//!
//! The color bytes sit where the default `0 / 8 / 16` color offsets expect
//! them.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cloudtap_middleware::LoopbackTopic;
use cloudtap_types::{CloudError, PointCloudMessage, PointField};
use tracing::{debug, info};

const POINT_STRIDE: usize = 32;
const FLOAT32: u8 = 7;
const UINT8: u8 = 2;

/// Build frame number `tick` with `points` points.
pub fn frame(tick: u64, points: usize) -> PointCloudMessage {
    let mut payload = vec![0u8; points * POINT_STRIDE];
    let phase = (tick % 360) as f32 / 360.0 * TAU;
    let denom = points.max(1) as f32;

    for (i, point) in payload.chunks_exact_mut(POINT_STRIDE).enumerate() {
        let t = i as f32 / denom;
        let angle = phase + t * 4.0 * TAU;
        let radius = 1.0 + t * 4.0;
        let (x, y, z) = (radius * angle.cos(), radius * angle.sin(), t * 2.0);

        point[0..4].copy_from_slice(&x.to_le_bytes());
        point[4..8].copy_from_slice(&y.to_le_bytes());
        point[8..12].copy_from_slice(&z.to_le_bytes());
        point[12] = (t * 255.0) as u8;
        point[20] = ((1.0 - t) * 255.0) as u8;
        point[28] = 128;
    }

    PointCloudMessage {
        fields: vec![
            PointField { format_label: 1, byte_offset: 0, datatype: FLOAT32 },
            PointField { format_label: 2, byte_offset: 4, datatype: FLOAT32 },
            PointField { format_label: 3, byte_offset: 8, datatype: FLOAT32 },
            PointField { format_label: 8, byte_offset: 12, datatype: UINT8 },
        ],
        point_stride: POINT_STRIDE as u32,
        payload,
    }
}

/// Background thread publishing [`frame`]s at a fixed rate.
pub struct SyntheticPublisher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl SyntheticPublisher {
    /// Match a publisher on `topic` and start publishing `points`-point
    /// frames `rate_hz` times per second.
    pub fn start(topic: LoopbackTopic, rate_hz: u32, points: usize) -> Result<Self, CloudError> {
        let period = Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("cloudtap-synth".into())
            .spawn(move || {
                topic.match_publisher();
                let mut tick = 0u64;
                while !stop_flag.load(Ordering::SeqCst) {
                    topic.publish(frame(tick, points));
                    debug!(topic = topic.name(), tick, "synthetic frame published");
                    tick += 1;
                    thread::sleep(period);
                }
                topic.unmatch_publisher();
                debug!(
                    topic = topic.name(),
                    unread = topic.pending_samples(),
                    "synthetic publisher unmatched"
                );
                tick
            })
            .map_err(|e| CloudError::Channel(format!("failed to spawn synthetic publisher: {e}")))?;

        info!(rate_hz, points, "synthetic publisher started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop publishing and return the number of frames sent.
    pub fn stop(mut self) -> u64 {
        self.stop.store(true, Ordering::SeqCst);
        self.handle
            .take()
            .map(|h| h.join().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Drop for SyntheticPublisher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudtap_perception::PointDecoder;
    use cloudtap_types::Scalar;

    #[test]
    fn frame_decodes_with_default_color_offsets() -> Result<(), Box<dyn std::error::Error>> {
        let msg = frame(0, 4);
        assert_eq!(msg.payload.len(), 4 * POINT_STRIDE);

        let points = PointDecoder::default().decode(&msg)?;
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].x, Some(Scalar::F32(1.0)));
        assert_eq!(points[0].z, Some(Scalar::F32(0.0)));
        assert_eq!(points[0].r, Some(Scalar::U8(0)));
        assert_eq!(points[0].g, Some(Scalar::U8(255)));
        assert_eq!(points[0].b, Some(Scalar::U8(128)));
        // Color bytes must not leak into the next point's coordinates.
        assert_eq!(points[1].z, Some(Scalar::F32(0.5)));
        Ok(())
    }

    #[test]
    fn empty_frame_has_no_points() {
        let msg = frame(7, 0);
        assert!(msg.payload.is_empty());
        assert_eq!(msg.point_stride, 32);
    }

    #[test]
    fn publisher_matches_publishes_and_unmatches() {
        use cloudtap_middleware::{Loopback, SessionFactory};

        let loopback = Loopback::new();
        let mut session = loopback.create_session("synth").unwrap();
        let topic = loopback.topic("synth");

        let publisher = SyntheticPublisher::start(topic.clone(), 100, 8).unwrap();
        thread::sleep(Duration::from_millis(50));
        let sent = publisher.stop();

        assert!(sent >= 1);
        assert_eq!(topic.pending_samples() as u64, sent);
        let matched = session.reader.subscription_matched_status().unwrap();
        assert_eq!(matched.total_count, 1);
        assert_eq!(matched.current_count, 0);
    }
}
