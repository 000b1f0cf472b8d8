//! `cloudtap-perception` – point cloud decoding.
//!
//! Turns the raw, self-describing byte buffers delivered by the middleware
//! into typed [`PointRecord`][cloudtap_types::PointRecord] sequences that a
//! visualiser can consume directly.
//!
//! # Modules
//!
//! - [`datatype`] – [`DatatypeCode`][datatype::DatatypeCode]: the eight
//!   little-endian scalar encodings a field may use, and the reader that
//!   decodes one value from a byte buffer.
//! - [`schema`] – [`FieldSchema`][schema::FieldSchema]: locates the X, Y, Z
//!   and color fields of a sample and applies the
//!   [`ColorOffsets`][schema::ColorOffsets] channel policy.
//! - [`decoder`] – [`PointDecoder`][decoder::PointDecoder]: walks the
//!   payload one stride at a time and produces index-aligned point records.

pub mod datatype;
pub mod decoder;
pub mod schema;

pub use datatype::DatatypeCode;
pub use decoder::PointDecoder;
pub use schema::{ColorOffsets, FieldSchema, FormatLabel, ResolvedField};
