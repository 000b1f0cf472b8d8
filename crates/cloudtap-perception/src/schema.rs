//! Field schema resolution.
//!
//! A sample describes its own layout through an ordered list of
//! [`PointField`]s.  [`FieldSchema::resolve`] scans that list once per
//! channel and pins down where X, Y, Z and the three color components live
//! inside each point.
//!
//! # Color channels
//!
//! Publishers on the supported topics describe color with a single packed
//! field (format label 8).  The R, G and B components are read from that
//! field's offset plus a fixed per-channel displacement, given by
//! [`ColorOffsets`].  The default displacement of `0 / 8 / 16` bytes matches
//! the data seen so far; it is configurable because the packing has not been
//! confirmed against every sensor vendor.

use cloudtap_types::{CloudError, PointField, Scalar};
use serde::{Deserialize, Serialize};

use crate::datatype::read_value;

/// Semantic format labels understood by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FormatLabel {
    X = 1,
    Y = 2,
    Z = 3,
    /// Packed multi-channel color.
    Color = 8,
}

impl FormatLabel {
    /// The wire value of this label.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Byte offset and datatype code of one output attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    pub offset: usize,
    pub datatype: u8,
}

impl ResolvedField {
    /// Read this attribute for the point starting at `base`.
    pub fn read(&self, payload: &[u8], base: usize) -> Option<Scalar> {
        read_value(payload, base.checked_add(self.offset)?, self.datatype)
    }

    fn shifted(self, extra: u32) -> Self {
        Self {
            offset: self.offset.saturating_add(extra as usize),
            datatype: self.datatype,
        }
    }
}

/// Return the first field whose format label equals `label`.
///
/// # Errors
///
/// [`CloudError::FieldNotFound`] when no field carries the label.
pub fn resolve_field(fields: &[PointField], label: u8) -> Result<ResolvedField, CloudError> {
    fields
        .iter()
        .find(|f| f.format_label == label)
        .map(|f| ResolvedField {
            offset: f.byte_offset as usize,
            datatype: f.datatype,
        })
        .ok_or(CloudError::FieldNotFound { label })
}

/// Extra byte displacement applied to the packed color field per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorOffsets {
    pub r: u32,
    pub g: u32,
    pub b: u32,
}

impl Default for ColorOffsets {
    fn default() -> Self {
        Self { r: 0, g: 8, b: 16 }
    }
}

/// Resolved layout for all six output attributes of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub x: ResolvedField,
    pub y: ResolvedField,
    pub z: ResolvedField,
    pub r: ResolvedField,
    pub g: ResolvedField,
    pub b: ResolvedField,
}

impl FieldSchema {
    /// Resolve every channel of `fields`.
    ///
    /// # Errors
    ///
    /// [`CloudError::FieldNotFound`] naming the first channel (in X, Y, Z,
    /// color order) that has no matching field.
    pub fn resolve(fields: &[PointField], color: ColorOffsets) -> Result<Self, CloudError> {
        let x = resolve_field(fields, FormatLabel::X.code())?;
        let y = resolve_field(fields, FormatLabel::Y.code())?;
        let z = resolve_field(fields, FormatLabel::Z.code())?;
        let packed = resolve_field(fields, FormatLabel::Color.code())?;
        Ok(Self {
            x,
            y,
            z,
            r: packed.shifted(color.r),
            g: packed.shifted(color.g),
            b: packed.shifted(color.b),
        })
    }
}
