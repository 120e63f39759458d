//! Compiled per-field encoding plans.

use core::fmt;
use std::sync::{Arc, OnceLock, Weak};

use facet_core::{ScalarType, Shape};

use crate::custom::CustomCodec;
use crate::encoder::EncodeFn;
use crate::error::SchemaError;
use crate::well_known::WellKnown;
use crate::wire::{MAX_TAG, TagCode, WireType};

/// The keyword at the start of a `proto3::wire` metadata string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireKind {
    /// `varint`: plain base-128, negative numbers take ten bytes
    Varint,
    /// `fixed32`: four little-endian bytes
    Fixed32,
    /// `fixed64`: eight little-endian bytes
    Fixed64,
    /// `zigzag32`: zigzag-mapped 32-bit varint
    Zigzag32,
    /// `zigzag64`: zigzag-mapped 64-bit varint
    Zigzag64,
    /// `bytes`: length-delimited
    Bytes,
}

impl WireKind {
    /// Wire type written in the field key.
    pub fn wire_type(self) -> WireType {
        match self {
            WireKind::Varint | WireKind::Zigzag32 | WireKind::Zigzag64 => WireType::Varint,
            WireKind::Fixed32 => WireType::Fixed32,
            WireKind::Fixed64 => WireType::Fixed64,
            WireKind::Bytes => WireType::Bytes,
        }
    }

    /// The metadata keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            WireKind::Varint => "varint",
            WireKind::Fixed32 => "fixed32",
            WireKind::Fixed64 => "fixed64",
            WireKind::Zigzag32 => "zigzag32",
            WireKind::Zigzag64 => "zigzag64",
            WireKind::Bytes => "bytes",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "varint" => WireKind::Varint,
            "fixed32" => WireKind::Fixed32,
            "fixed64" => WireKind::Fixed64,
            "zigzag32" => WireKind::Zigzag32,
            "zigzag64" => WireKind::Zigzag64,
            "bytes" => WireKind::Bytes,
            _ => return None,
        })
    }
}

impl fmt::Display for WireKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A parsed metadata string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Metadata {
    Skip,
    Wire { kind: WireKind, tag: u32 },
}

impl Metadata {
    /// Parses `"<kind>,<tag>[,<flags>...]"` or `"-"`.
    pub(crate) fn parse(owner: &'static str, field: &str, raw: &str) -> Result<Self, SchemaError> {
        if raw == "-" {
            return Ok(Metadata::Skip);
        }
        let invalid = |reason| SchemaError::InvalidMetadata {
            owner,
            field: field.to_string(),
            metadata: raw.to_string(),
            reason,
        };

        let mut parts = raw.split(',').map(str::trim);
        let keyword = parts.next().unwrap_or_default();
        let Some(tag_text) = parts.next() else {
            return Err(invalid("expected \"<kind>,<tag>\""));
        };
        let kind = WireKind::from_keyword(keyword).ok_or_else(|| invalid("unknown wire kind"))?;
        // trailing flags are ignored

        let tag = match tag_text.parse::<i64>() {
            Ok(tag) if tag > 0 && tag <= i64::from(MAX_TAG) => tag as u32,
            _ => {
                return Err(SchemaError::InvalidTag {
                    owner,
                    field: field.to_string(),
                    tag: tag_text.to_string(),
                });
            }
        };
        Ok(Metadata::Wire { kind, tag })
    }
}

/// Integer, bool and float element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Numeric {
    Bool,
    I8,
    I16,
    I32,
    I64,
    ISize,
    U8,
    U16,
    U32,
    U64,
    USize,
    F32,
    F64,
}

impl Numeric {
    pub(crate) fn from_scalar(scalar: ScalarType) -> Option<Self> {
        Some(match scalar {
            ScalarType::Bool => Numeric::Bool,
            ScalarType::I8 => Numeric::I8,
            ScalarType::I16 => Numeric::I16,
            ScalarType::I32 => Numeric::I32,
            ScalarType::I64 => Numeric::I64,
            ScalarType::ISize => Numeric::ISize,
            ScalarType::U8 => Numeric::U8,
            ScalarType::U16 => Numeric::U16,
            ScalarType::U32 => Numeric::U32,
            ScalarType::U64 => Numeric::U64,
            ScalarType::USize => Numeric::USize,
            ScalarType::F32 => Numeric::F32,
            ScalarType::F64 => Numeric::F64,
            _ => return None,
        })
    }

    fn is_signed(self) -> bool {
        matches!(
            self,
            Numeric::I8 | Numeric::I16 | Numeric::I32 | Numeric::I64 | Numeric::ISize
        )
    }

    fn is_narrow(self) -> bool {
        !matches!(
            self,
            Numeric::I64 | Numeric::ISize | Numeric::U64 | Numeric::USize | Numeric::F64
        )
    }

    pub(crate) fn is_integral(self) -> bool {
        !matches!(self, Numeric::F32 | Numeric::F64)
    }

    /// The proto3 scalar type this element encodes as under `kind`, or
    /// `None` when the combination is not allowed.
    pub(crate) fn proto_type(self, kind: WireKind) -> Option<&'static str> {
        use Numeric::*;
        let name = match (kind, self) {
            (WireKind::Varint, Bool) => "bool",
            (WireKind::Varint, F32 | F64) => return None,
            (WireKind::Varint, n) if n.is_signed() => {
                if n.is_narrow() {
                    "int32"
                } else {
                    "int64"
                }
            }
            (WireKind::Varint, n) => {
                if n.is_narrow() {
                    "uint32"
                } else {
                    "uint64"
                }
            }
            (WireKind::Zigzag32, n) if n.is_signed() && n.is_narrow() => "sint32",
            (WireKind::Zigzag64, n) if n.is_signed() => "sint64",
            (WireKind::Fixed32, F32) => "float",
            (WireKind::Fixed32, n) if n.is_integral() && n != Bool && n.is_narrow() => {
                if n.is_signed() {
                    "sfixed32"
                } else {
                    "fixed32"
                }
            }
            (WireKind::Fixed64, F64) => "double",
            (WireKind::Fixed64, n) if n.is_integral() && n != Bool => {
                if n.is_signed() {
                    "sfixed64"
                } else {
                    "fixed64"
                }
            }
            _ => return None,
        };
        Some(name)
    }
}

/// How a bytes element is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BytesRepr {
    Vec,
    Slice,
    Array(usize),
}

/// Where the field's elements live inside the field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Storage {
    /// The field is the element
    Value,
    /// `Option<element>`
    Optional,
    /// `Vec<element>`
    Repeated,
    /// `[element; N]`
    Array(usize),
    /// `HashMap` or `BTreeMap`
    Map,
}

/// The resolved element a dispatch function writes.
pub(crate) enum Element {
    Numeric(Numeric),
    Text,
    Bytes(BytesRepr),
    Message(MessageRef),
    Custom(CustomCodec),
    MapEntry(Box<MapEntry>),
    /// Zero-length arrays
    Nothing,
}

/// Link from a field to the schema of the record it holds.
#[derive(Clone)]
pub(crate) struct MessageRef {
    pub(crate) schema: Weak<Schema>,
    /// The record sits behind `Box`, `Arc` or `Option`, so an empty body is
    /// still written.
    pub(crate) by_ref: bool,
}

/// Key and value descriptors of a map field, tags 1 and 2 of the synthetic
/// entry message.
pub(crate) struct MapEntry {
    pub(crate) key: FieldDescriptor,
    pub(crate) val: FieldDescriptor,
}

/// Everything needed to encode one field, resolved when its record is compiled.
pub struct FieldDescriptor {
    pub(crate) name: &'static str,
    pub(crate) tag: u32,
    pub(crate) kind: WireKind,
    pub(crate) tagcode: TagCode,
    /// Position of the field in its struct; 0 for map key and value.
    pub(crate) index: usize,
    pub(crate) storage: Storage,
    /// Sequence elements are `Option`s; a `None` element is an error.
    pub(crate) nullable: bool,
    pub(crate) element: Element,
    pub(crate) enc: EncodeFn,
    pub(crate) proto_type: String,
}

impl FieldDescriptor {
    /// The Rust field name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The proto3 field number.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// The metadata keyword.
    pub fn kind(&self) -> WireKind {
        self.kind
    }

    /// Wire type in the key. Packed fields report `Bytes`.
    pub fn wire_type(&self) -> WireType {
        match (&self.element, self.storage) {
            (Element::Numeric(_), Storage::Repeated | Storage::Array(_)) => WireType::Bytes,
            _ => self.kind.wire_type(),
        }
    }

    /// The precomputed key bytes.
    pub fn tagcode(&self) -> &[u8] {
        self.tagcode.as_bytes()
    }

    /// The proto3 type as it appears in schema text, e.g. `repeated sint32`.
    pub fn proto_type(&self) -> &str {
        &self.proto_type
    }

    /// Fixed array length, if the field is an array.
    pub fn array_len(&self) -> Option<usize> {
        match self.storage {
            Storage::Array(n) => Some(n),
            _ => None,
        }
    }

    /// Schema of the nested record, when the field holds one.
    pub(crate) fn message(&self) -> Option<&MessageRef> {
        match &self.element {
            Element::Message(m) => Some(m),
            Element::MapEntry(entry) => entry.val.message(),
            _ => None,
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("tagcode", &self.tagcode)
            .field("storage", &self.storage)
            .field("proto_type", &self.proto_type)
            .finish()
    }
}

/// The compiled encoding plan of one record type.
///
/// Fields are kept in ascending tag order, which is also the order they are
/// written in.
pub struct Schema {
    pub(crate) shape: &'static Shape,
    pub(crate) fields: OnceLock<Box<[FieldDescriptor]>>,
    pub(crate) well_known: Option<WellKnown>,
}

impl Schema {
    pub(crate) fn placeholder(shape: &'static Shape) -> Arc<Self> {
        Arc::new(Self {
            shape,
            fields: OnceLock::new(),
            well_known: None,
        })
    }

    pub(crate) fn synthesized(shape: &'static Shape, which: WellKnown) -> Arc<Self> {
        let fields = OnceLock::new();
        let _ = fields.set(Box::default());
        Arc::new(Self {
            shape,
            fields,
            well_known: Some(which),
        })
    }

    /// The record's shape.
    pub fn shape(&self) -> &'static Shape {
        self.shape
    }

    /// Name used for this record in schema text.
    pub fn message_name(&self) -> &'static str {
        match self.well_known {
            Some(wk) => wk.proto_name(),
            None => self.shape.type_identifier,
        }
    }

    /// True for `google.protobuf.Timestamp` and `google.protobuf.Duration`.
    pub fn is_well_known(&self) -> bool {
        self.well_known.is_some()
    }

    /// Field descriptors in tag order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        self.fields.get().map(|f| &**f).unwrap_or_default()
    }

    /// Looks up a field by tag.
    pub fn field_by_tag(&self, tag: u32) -> Option<&FieldDescriptor> {
        let fields = self.fields();
        fields
            .binary_search_by_key(&tag, |f| f.tag)
            .ok()
            .map(|i| &fields[i])
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("message", &self.message_name())
            .field("fields", &self.fields())
            .finish()
    }
}
