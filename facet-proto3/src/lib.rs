//! proto3 binary encoding for facet types, without `.proto` files.
//!
//! Every encoded field carries its wire kind and field number in a
//! `proto3::wire` attribute. The first time a type is encoded its layout is
//! compiled into a [`Schema`] and cached in a [`SchemaRegistry`]; after that
//! encoding walks the cached plan.
//!
//! ```
//! use facet::Facet;
//! use facet_proto3 as proto3;
//!
//! #[derive(Facet)]
//! struct Point {
//!     #[facet(proto3::wire = "zigzag32,1")]
//!     x: i32,
//!     #[facet(proto3::wire = "zigzag32,2")]
//!     y: i32,
//!     #[facet(proto3::wire = "-")]
//!     label: String,
//! }
//!
//! let bytes = facet_proto3::to_vec(&Point { x: 1, y: -1, label: "ignored".into() }).unwrap();
//! assert_eq!(bytes, [0x08, 0x02, 0x10, 0x01]);
//! ```
//!
//! # Metadata
//!
//! `proto3::wire = "<kind>,<tag>"`, where `<kind>` is one of `varint`,
//! `zigzag32`, `zigzag64`, `fixed32`, `fixed64` or `bytes` and `<tag>` is in
//! `1..=536870911`. Further comma-separated flags are accepted and ignored.
//! `"-"` (or `#[facet(skip)]`) leaves the field out. Map fields also need
//! `proto3::key = "<kind>,1"` and `proto3::val = "<kind>,2"`.
//!
//! # Type Mapping
//!
//! | Rust Type | Kinds | proto3 Type |
//! |-----------|-------|-------------|
//! | `bool` | `varint` | bool |
//! | `i8`, `i16`, `i32` | `varint` / `zigzag32` / `fixed32` | int32 / sint32 / sfixed32 |
//! | `i64`, `isize` | `varint` / `zigzag64` / `fixed64` | int64 / sint64 / sfixed64 |
//! | `u8`, `u16`, `u32` | `varint` / `fixed32` | uint32 / fixed32 |
//! | `u64`, `usize` | `varint` / `fixed64` | uint64 / fixed64 |
//! | `f32` | `fixed32` | float |
//! | `f64` | `fixed64` | double |
//! | `String`, `&str`, `Cow<str>` | `bytes` | string |
//! | `Vec<u8>`, `&[u8]`, `[u8; N]` | `bytes` | bytes |
//! | struct, `Box<struct>`, `Arc<struct>` | `bytes` | message |
//! | [`Timestamp`] | `bytes` | google.protobuf.Timestamp |
//! | `core::time::Duration` | `bytes` | google.protobuf.Duration |
//! | `Vec<T>`, `[T; N]` | as `T` | repeated (numbers packed) |
//! | `Option<T>` | as `T` | `T` with presence |
//! | `HashMap<K, V>`, `BTreeMap<K, V>` | `bytes` | map |
//!
//! Signed integers may also use `zigzag64` and narrow integers `fixed64`.
//! Types that implement [`Marshaler`] or [`Appender`] and are registered on a
//! [`RegistryConfig`] take any kind and produce their own payload.
//!
//! Zero values are not written, except inside `Option`, sequences, and
//! records held by pointer. `Some` always writes its key, so
//! `Some(Duration::ZERO)` and a `Some` self-encoding value with an empty
//! payload both produce a key with an empty body.
//!
//! `core::time::Duration` values longer than 315,576,000,000 seconds are
//! outside the `google.protobuf.Duration` range and fail with
//! [`EncodeError::DurationOutOfRange`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod custom;
mod descriptor;
mod encoder;
mod error;
mod pool;
mod registry;
mod text;
pub mod well_known;
pub mod wire;

pub use custom::{Appender, Marshaler, Unmarshaler};
pub use descriptor::{FieldDescriptor, Schema, WireKind};
pub use error::{BoxError, EncodeError, SchemaError};
pub use pool::{BufferPool, PoolStats, PooledBuf};
pub use registry::{RegistryConfig, SchemaRegistry, UnsupportedFieldPolicy};
pub use well_known::Timestamp;

use facet_core::Facet;

facet::define_attr_grammar! {
    ns "proto3";
    crate_path ::facet_proto3;

    /// proto3 field metadata.
    pub enum Attr {
        /// Wire kind and field number: `#[facet(proto3::wire = "varint,1")]`,
        /// or `"-"` to leave the field out
        Wire(&'static str),
        /// Wire kind of a map key, always tag 1: `#[facet(proto3::key = "bytes,1")]`
        Key(&'static str),
        /// Wire kind of a map value, always tag 2: `#[facet(proto3::val = "varint,2")]`
        Val(&'static str),
    }
}

/// Encodes `value` with the process-wide [`SchemaRegistry`].
pub fn to_vec<T: Facet<'static>>(value: &T) -> Result<Vec<u8>, EncodeError> {
    SchemaRegistry::global().marshal(value)
}

/// Appends the encoding of `value` to `buf` using the process-wide registry.
/// On error `buf` is left unchanged.
pub fn to_writer<T: Facet<'static>>(value: &T, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    SchemaRegistry::global().marshal_into(value, buf)
}

/// The `message` block for `T`, as compiled by the process-wide registry.
pub fn schema_text<T: Facet<'static>>() -> Result<String, SchemaError> {
    SchemaRegistry::global().schema_text::<T>()
}

/// A `.proto` file describing `T` and every record it reaches.
pub fn schema_text_full<T: Facet<'static>>() -> Result<String, SchemaError> {
    SchemaRegistry::global().schema_text_full::<T>()
}
