//! [`PointDecoder`] – raw sample → point records.
//!
//! # Algorithm
//!
//! ```text
//! num_points = floor(payload.len() / point_stride)
//! for i in 0..num_points:
//!     base = i * point_stride
//!     attr = read(payload, base + attr.offset, attr.datatype)   // per attribute
//! ```
//!
//! A partial trailing point is ignored.  Attribute reads are made against
//! the whole payload rather than the point's own stride window, so a color
//! offset that reaches past the stride reads into the following point's
//! bytes; past the end of the payload the attribute is absent.
//!
//! Decoding is a pure function of its inputs.
//!
//! # Example
//!
//! ```rust
//! use cloudtap_perception::PointDecoder;
//! use cloudtap_types::{PointCloudMessage, PointField, Scalar};
//!
//! let mut payload = Vec::new();
//! for v in [1.0f32, 2.0, 3.0, 0.0] {
//!     payload.extend_from_slice(&v.to_le_bytes());
//! }
//! let msg = PointCloudMessage {
//!     fields: vec![
//!         PointField { format_label: 1, byte_offset: 0, datatype: 7 },
//!         PointField { format_label: 2, byte_offset: 4, datatype: 7 },
//!         PointField { format_label: 3, byte_offset: 8, datatype: 7 },
//!         PointField { format_label: 8, byte_offset: 12, datatype: 2 },
//!     ],
//!     point_stride: 16,
//!     payload,
//! };
//!
//! let points = PointDecoder::default().decode(&msg).unwrap();
//! assert_eq!(points.len(), 1);
//! assert_eq!(points[0].z, Some(Scalar::F32(3.0)));
//! ```

use cloudtap_types::{CloudError, PointCloudMessage, PointRecord};
use tracing::trace;

use crate::schema::{ColorOffsets, FieldSchema};

/// Number of whole points held by a payload of `payload_len` bytes.
///
/// Returns 0 for a zero stride.
pub fn point_count(payload_len: usize, point_stride: usize) -> usize {
    payload_len.checked_div(point_stride).unwrap_or(0)
}

/// Decode every whole point of `payload` using an already resolved schema.
pub fn decode_points(payload: &[u8], point_stride: usize, schema: &FieldSchema) -> Vec<PointRecord> {
    let num_points = point_count(payload.len(), point_stride);
    (0..num_points)
        .map(|i| {
            let base = i * point_stride;
            PointRecord {
                x: schema.x.read(payload, base),
                y: schema.y.read(payload, base),
                z: schema.z.read(payload, base),
                r: schema.r.read(payload, base),
                g: schema.g.read(payload, base),
                b: schema.b.read(payload, base),
            }
        })
        .collect()
}

/// Stateless decoder carrying the color channel policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointDecoder {
    color_offsets: ColorOffsets,
}

impl PointDecoder {
    /// Create a decoder that applies `color_offsets` to the packed color field.
    pub fn new(color_offsets: ColorOffsets) -> Self {
        Self { color_offsets }
    }

    /// Resolve the schema of `msg` and decode all of its points.
    ///
    /// # Errors
    ///
    /// * [`CloudError::InvalidPointStride`] when the stride is zero.
    /// * [`CloudError::FieldNotFound`] when a required channel is missing.
    pub fn decode(&self, msg: &PointCloudMessage) -> Result<Vec<PointRecord>, CloudError> {
        if msg.point_stride == 0 {
            return Err(CloudError::InvalidPointStride(msg.point_stride));
        }
        let schema = FieldSchema::resolve(&msg.fields, self.color_offsets)?;
        let points = decode_points(&msg.payload, msg.point_stride as usize, &schema);
        trace!(
            points = points.len(),
            payload_bytes = msg.payload.len(),
            stride = msg.point_stride,
            "decoded point cloud sample"
        );
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudtap_types::{PointField, Scalar};

    const F32: u8 = 7;
    const U32: u8 = 6;

    fn layout() -> Vec<PointField> {
        vec![
            PointField { format_label: 1, byte_offset: 0, datatype: F32 },
            PointField { format_label: 2, byte_offset: 4, datatype: F32 },
            PointField { format_label: 3, byte_offset: 8, datatype: F32 },
            PointField { format_label: 8, byte_offset: 16, datatype: U32 },
        ]
    }

    /// Build a stride-24 point: xyz floats, 4 pad bytes, u32 color, 4 pad bytes.
    fn point_bytes(x: f32, y: f32, z: f32, color: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
        out.extend_from_slice(&z.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&color.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out
    }

    fn message(points: &[(f32, f32, f32, u32)], trailing: usize) -> PointCloudMessage {
        let mut payload: Vec<u8> = points
            .iter()
            .flat_map(|&(x, y, z, c)| point_bytes(x, y, z, c))
            .collect();
        payload.extend(std::iter::repeat_n(0xEE, trailing));
        PointCloudMessage {
            fields: layout(),
            point_stride: 24,
            payload,
        }
    }

    #[test]
    fn two_point_message_decodes_injected_coordinates() {
        let msg = message(&[(1.0, 2.0, 3.0, 10), (-4.5, 0.25, 100.0, 20)], 0);
        let points = PointDecoder::default().decode(&msg).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].x, Some(Scalar::F32(1.0)));
        assert_eq!(points[0].y, Some(Scalar::F32(2.0)));
        assert_eq!(points[0].z, Some(Scalar::F32(3.0)));
        assert_eq!(points[1].x, Some(Scalar::F32(-4.5)));
        assert_eq!(points[1].y, Some(Scalar::F32(0.25)));
        assert_eq!(points[1].z, Some(Scalar::F32(100.0)));
    }

    #[test]
    fn color_channels_follow_offset_policy() {
        let msg = message(&[(0.0, 0.0, 0.0, 10), (0.0, 0.0, 0.0, 20)], 0);
        let points = PointDecoder::default().decode(&msg).unwrap();

        // R at 16, G at 24 (next point's x), B at 32 (next point's z).
        assert_eq!(points[0].r, Some(Scalar::U32(10)));
        assert_eq!(points[0].g, Some(Scalar::U32(0)));
        assert_eq!(points[0].b, Some(Scalar::U32(0)));
        assert_eq!(points[1].r, Some(Scalar::U32(20)));
        // Past the end of the payload.
        assert_eq!(points[1].g, None);
        assert_eq!(points[1].b, None);
    }

    #[test]
    fn zero_color_offsets_read_packed_field_thrice() {
        let msg = message(&[(0.0, 0.0, 0.0, 0x00AA_BBCC)], 0);
        let decoder = PointDecoder::new(ColorOffsets { r: 0, g: 0, b: 0 });
        let p = decoder.decode(&msg).unwrap()[0];
        assert_eq!(p.r, Some(Scalar::U32(0x00AA_BBCC)));
        assert_eq!(p.r, p.g);
        assert_eq!(p.g, p.b);
    }

    #[test]
    fn exact_multiple_of_stride() {
        for k in 0..5 {
            let pts: Vec<_> = (0..k).map(|i| (i as f32, 0.0, 0.0, 0)).collect();
            let msg = message(&pts, 0);
            assert_eq!(PointDecoder::default().decode(&msg).unwrap().len(), k);
        }
    }

    #[test]
    fn partial_trailing_point_is_discarded() {
        for trailing in [1, 12, 23] {
            let msg = message(&[(1.0, 1.0, 1.0, 0), (2.0, 2.0, 2.0, 0)], trailing);
            let points = PointDecoder::default().decode(&msg).unwrap();
            assert_eq!(points.len(), 2, "trailing = {trailing}");
        }
    }

    #[test]
    fn output_is_index_aligned_with_input() {
        let pts: Vec<_> = (0..16).map(|i| (i as f32, -(i as f32), 0.5 * i as f32, 0)).collect();
        let points = PointDecoder::default().decode(&message(&pts, 0)).unwrap();
        for (i, p) in points.iter().enumerate() {
            assert_eq!(p.x, Some(Scalar::F32(i as f32)));
            assert_eq!(p.y, Some(Scalar::F32(-(i as f32))));
        }
    }

    #[test]
    fn unknown_datatype_yields_absent_attribute_only() {
        let mut msg = message(&[(1.0, 2.0, 3.0, 0)], 0);
        msg.fields[1].datatype = 42;
        let p = PointDecoder::default().decode(&msg).unwrap()[0];
        assert_eq!(p.x, Some(Scalar::F32(1.0)));
        assert_eq!(p.y, None);
        assert_eq!(p.z, Some(Scalar::F32(3.0)));
    }

    #[test]
    fn missing_field_fails_the_message() {
        let mut msg = message(&[(1.0, 2.0, 3.0, 0)], 0);
        msg.fields.retain(|f| f.format_label != 3);
        assert_eq!(
            PointDecoder::default().decode(&msg),
            Err(CloudError::FieldNotFound { label: 3 })
        );
    }

    #[test]
    fn zero_stride_is_rejected() {
        let mut msg = message(&[(1.0, 2.0, 3.0, 0)], 0);
        msg.point_stride = 0;
        assert_eq!(
            PointDecoder::default().decode(&msg),
            Err(CloudError::InvalidPointStride(0))
        );
    }

    #[test]
    fn point_count_floors() {
        assert_eq!(point_count(48, 24), 2);
        assert_eq!(point_count(47, 24), 1);
        assert_eq!(point_count(23, 24), 0);
        assert_eq!(point_count(10, 0), 0);
    }
}
