//! Walks a compiled [`Schema`] against a value and appends proto3 bytes.
//!
//! Each field descriptor carries the dispatch function chosen for it at
//! compile time. The functions here read the field through facet-reflect and
//! write keys and payloads with the primitives from [`crate::wire`].
//!
//! Length-delimited bodies whose size is unknown up front (nested messages,
//! map entries, packed varints, appended payloads) are written after a
//! reserved length prefix, then the prefix is resized and filled in.

use std::borrow::Cow;

use facet_core::Def;
use facet_reflect::Peek;
use tracing::trace;

use crate::custom::{CustomCodec, CustomStyle};
use crate::descriptor::{BytesRepr, Element, FieldDescriptor, MessageRef, Numeric, Schema, WireKind};
use crate::error::EncodeError;
use crate::well_known::{self, Timestamp, WellKnown};
use crate::wire::{
    encode_fixed32, encode_fixed64, encode_raw_bytes, encode_string, encode_varint,
    put_varint, size_varint, zigzag32, zigzag64,
};

/// Dispatch function stored in each [`FieldDescriptor`]. Receives the
/// field's value, not the owning record.
pub(crate) type EncodeFn =
    for<'mem> fn(&mut Encoder<'_>, &FieldDescriptor, Peek<'mem, 'static>) -> Result<(), EncodeError>;

/// Bytes reserved for the length of a nested message before its size is known.
const MESSAGE_LEN_RESERVE: usize = 4;

/// Bytes reserved for the length of an [`Appender`](crate::Appender) payload.
const APPEND_LEN_RESERVE: usize = 1;

pub(crate) struct Encoder<'buf> {
    buf: &'buf mut Vec<u8>,
}

impl<'buf> Encoder<'buf> {
    pub(crate) fn new(buf: &'buf mut Vec<u8>) -> Self {
        Self { buf }
    }

    /// Writes the body of a message: every field in tag order, without a key
    /// or length prefix.
    pub(crate) fn encode_message(
        &mut self,
        schema: &Schema,
        value: Peek<'_, 'static>,
    ) -> Result<(), EncodeError> {
        if let Some(which) = schema.well_known {
            return self.encode_well_known(which, value);
        }

        let record = value.into_struct().map_err(EncodeError::reflect)?;
        for desc in schema.fields() {
            let field = record.field(desc.index).map_err(EncodeError::reflect)?;
            trace!(
                "Encoding {}.{} (tag {}) at offset {}",
                schema.message_name(),
                desc.name,
                desc.tag,
                self.buf.len()
            );
            (desc.enc)(self, desc, field)?;
        }
        Ok(())
    }

    /// Writes the raw payload of a self-encoding value, with no key.
    pub(crate) fn encode_custom_payload(
        &mut self,
        codec: &CustomCodec,
        value: Peek<'_, 'static>,
    ) -> Result<(), EncodeError> {
        let value = deref_pointer(value)?;
        match codec.style {
            CustomStyle::Marshal(marshal) => {
                let payload = marshal(value)?;
                self.buf.extend_from_slice(&payload);
                Ok(())
            }
            CustomStyle::Append(append) => append(value, self.buf),
        }
    }

    fn encode_well_known(
        &mut self,
        which: WellKnown,
        value: Peek<'_, 'static>,
    ) -> Result<(), EncodeError> {
        match which {
            WellKnown::Timestamp => {
                let ts = value.get::<Timestamp>().map_err(EncodeError::reflect)?;
                well_known::encode_timestamp(self.buf, ts);
            }
            WellKnown::Duration => {
                let d = value
                    .get::<core::time::Duration>()
                    .map_err(EncodeError::reflect)?;
                well_known::encode_duration(self.buf, d)?;
            }
        }
        Ok(())
    }

    /// Writes one element with its key. With `elide` set, zero values,
    /// empty strings and empty value-typed messages write nothing.
    fn write_element(
        &mut self,
        desc: &FieldDescriptor,
        value: Peek<'_, 'static>,
        elide: bool,
    ) -> Result<(), EncodeError> {
        match &desc.element {
            Element::Numeric(numeric) => {
                let number = Number::read(value, *numeric)?;
                if elide && number.is_zero() {
                    return Ok(());
                }
                desc.tagcode.write(self.buf);
                number.write(self.buf, desc.kind);
            }
            Element::Text => {
                let text = value.as_str().ok_or_else(|| not_readable(value, "text"))?;
                if elide && text.is_empty() {
                    return Ok(());
                }
                desc.tagcode.write(self.buf);
                encode_string(self.buf, text);
            }
            Element::Bytes(repr) => {
                let bytes = read_bytes(value, *repr)?;
                if elide && bytes.is_empty() {
                    return Ok(());
                }
                desc.tagcode.write(self.buf);
                encode_raw_bytes(self.buf, &bytes);
            }
            Element::Message(message) => self.write_message(desc, message, value, elide)?,
            Element::Custom(codec) => self.write_custom(desc, codec, value, elide)?,
            Element::MapEntry(_) | Element::Nothing => {}
        }
        Ok(())
    }

    fn write_message(
        &mut self,
        desc: &FieldDescriptor,
        message: &MessageRef,
        value: Peek<'_, 'static>,
        elide: bool,
    ) -> Result<(), EncodeError> {
        let value = deref_pointer(value)?;
        let schema = message.schema.upgrade().ok_or_else(|| {
            EncodeError::Reflect(format!(
                "schema for {} was dropped with its registry",
                value.shape()
            ))
        })?;

        let start = self.buf.len();
        desc.tagcode.write(self.buf);
        let len_pos = self.reserve_len(MESSAGE_LEN_RESERVE);
        self.encode_message(&schema, value)?;

        if elide && !message.by_ref && self.buf.len() == len_pos + MESSAGE_LEN_RESERVE {
            self.buf.truncate(start);
            return Ok(());
        }
        self.patch_len(len_pos, MESSAGE_LEN_RESERVE);
        Ok(())
    }

    fn write_custom(
        &mut self,
        desc: &FieldDescriptor,
        codec: &CustomCodec,
        value: Peek<'_, 'static>,
        elide: bool,
    ) -> Result<(), EncodeError> {
        let value = deref_pointer(value)?;
        let start = self.buf.len();
        match codec.style {
            CustomStyle::Marshal(marshal) => {
                let payload = marshal(value)?;
                if elide && payload.is_empty() {
                    return Ok(());
                }
                desc.tagcode.write(self.buf);
                if desc.kind == WireKind::Bytes {
                    encode_raw_bytes(self.buf, &payload);
                } else {
                    check_fixed_width(codec, desc.kind, payload.len())?;
                    self.buf.extend_from_slice(&payload);
                }
            }
            CustomStyle::Append(append) => {
                desc.tagcode.write(self.buf);
                if desc.kind == WireKind::Bytes {
                    let len_pos = self.reserve_len(APPEND_LEN_RESERVE);
                    append(value, self.buf)?;
                    if elide && self.buf.len() == len_pos + APPEND_LEN_RESERVE {
                        self.buf.truncate(start);
                        return Ok(());
                    }
                    self.patch_len(len_pos, APPEND_LEN_RESERVE);
                } else {
                    let payload_start = self.buf.len();
                    append(value, self.buf)?;
                    let written = self.buf.len() - payload_start;
                    if elide && written == 0 {
                        self.buf.truncate(start);
                        return Ok(());
                    }
                    check_fixed_width(codec, desc.kind, written)?;
                }
            }
        }
        Ok(())
    }

    /// Appends a zeroed placeholder for a length prefix and returns its position.
    fn reserve_len(&mut self, reserve: usize) -> usize {
        let len_pos = self.buf.len();
        self.buf.resize(len_pos + reserve, 0);
        len_pos
    }

    /// Fills in the length prefix reserved at `len_pos`, moving the body
    /// when its varint needs more or fewer than `reserved` bytes.
    fn patch_len(&mut self, len_pos: usize, reserved: usize) {
        let body_start = len_pos + reserved;
        let end = self.buf.len();
        let body_len = end - body_start;
        let needed = size_varint(body_len as u64);

        if needed > reserved {
            let extra = needed - reserved;
            self.buf.resize(end + extra, 0);
            self.buf.copy_within(body_start..end, body_start + extra);
        } else if needed < reserved {
            let spare = reserved - needed;
            self.buf.copy_within(body_start..end, body_start - spare);
            self.buf.truncate(end - spare);
        }
        put_varint(&mut self.buf[len_pos..len_pos + needed], body_len as u64);
    }
}

/// Value, boxed value or well-known scalar. Zero values are elided.
pub(crate) fn enc_value(
    enc: &mut Encoder<'_>,
    desc: &FieldDescriptor,
    value: Peek<'_, 'static>,
) -> Result<(), EncodeError> {
    enc.write_element(desc, value, true)
}

/// `Option<T>`: `None` writes nothing, `Some` is always written.
pub(crate) fn enc_optional(
    enc: &mut Encoder<'_>,
    desc: &FieldDescriptor,
    value: Peek<'_, 'static>,
) -> Result<(), EncodeError> {
    let option = value.into_option().map_err(EncodeError::reflect)?;
    match option.value() {
        Some(inner) => enc.write_element(desc, inner, false),
        None => Ok(()),
    }
}

/// Numeric sequences: one key, one length, then the bare payloads.
pub(crate) fn enc_packed(
    enc: &mut Encoder<'_>,
    desc: &FieldDescriptor,
    value: Peek<'_, 'static>,
) -> Result<(), EncodeError> {
    let Element::Numeric(numeric) = desc.element else {
        return Ok(());
    };
    let list = value.into_list_like().map_err(EncodeError::reflect)?;
    let count = list.len();
    if count == 0 {
        return Ok(());
    }

    desc.tagcode.write(enc.buf);
    match desc.kind {
        WireKind::Fixed32 | WireKind::Fixed64 => {
            let width = if desc.kind == WireKind::Fixed32 { 4 } else { 8 };
            encode_varint(enc.buf, (count * width) as u64);
            for item in list.iter() {
                Number::read(item, numeric)?.write(enc.buf, desc.kind);
            }
        }
        _ => {
            // every varint takes at least one byte, so the count is a lower bound
            let reserve = size_varint(count as u64);
            let len_pos = enc.reserve_len(reserve);
            for item in list.iter() {
                Number::read(item, numeric)?.write(enc.buf, desc.kind);
            }
            enc.patch_len(len_pos, reserve);
        }
    }
    Ok(())
}

/// Sequences of strings, bytes, messages and self-encoding values: one key
/// per element, and every element is written.
pub(crate) fn enc_repeated(
    enc: &mut Encoder<'_>,
    desc: &FieldDescriptor,
    value: Peek<'_, 'static>,
) -> Result<(), EncodeError> {
    let list = value.into_list_like().map_err(EncodeError::reflect)?;
    for item in list.iter() {
        let item = if desc.nullable {
            let option = item.into_option().map_err(EncodeError::reflect)?;
            option
                .value()
                .ok_or(EncodeError::RepeatedHasNil { field: desc.name })?
        } else {
            item
        };
        enc.write_element(desc, item, false)?;
    }
    Ok(())
}

/// Maps: one length-delimited entry per pair, key at tag 1, value at tag 2.
pub(crate) fn enc_map(
    enc: &mut Encoder<'_>,
    desc: &FieldDescriptor,
    value: Peek<'_, 'static>,
) -> Result<(), EncodeError> {
    let Element::MapEntry(entry) = &desc.element else {
        return Ok(());
    };
    let map = value.into_map().map_err(EncodeError::reflect)?;
    for (key, val) in map.iter() {
        desc.tagcode.write(enc.buf);
        let len_pos = enc.reserve_len(MESSAGE_LEN_RESERVE);
        enc.write_element(&entry.key, key, true)?;
        enc.write_element(&entry.val, val, true)?;
        enc.patch_len(len_pos, MESSAGE_LEN_RESERVE);
    }
    Ok(())
}

/// Zero-length arrays.
pub(crate) fn enc_nothing(
    _enc: &mut Encoder<'_>,
    _desc: &FieldDescriptor,
    _value: Peek<'_, 'static>,
) -> Result<(), EncodeError> {
    Ok(())
}

/// A numeric element read out of a value, widened to 64 bits.
#[derive(Clone, Copy, Debug)]
enum Number {
    Bool(bool),
    Signed(i64),
    Unsigned(u64),
    F32(f32),
    F64(f64),
}

impl Number {
    fn read(value: Peek<'_, 'static>, numeric: Numeric) -> Result<Self, EncodeError> {
        fn get<'mem, T: facet_core::Facet<'static>>(
            value: Peek<'mem, 'static>,
        ) -> Result<&'mem T, EncodeError> {
            value.get::<T>().map_err(EncodeError::reflect)
        }

        Ok(match numeric {
            Numeric::Bool => Number::Bool(*get::<bool>(value)?),
            Numeric::I8 => Number::Signed(i64::from(*get::<i8>(value)?)),
            Numeric::I16 => Number::Signed(i64::from(*get::<i16>(value)?)),
            Numeric::I32 => Number::Signed(i64::from(*get::<i32>(value)?)),
            Numeric::I64 => Number::Signed(*get::<i64>(value)?),
            Numeric::ISize => Number::Signed(*get::<isize>(value)? as i64),
            Numeric::U8 => Number::Unsigned(u64::from(*get::<u8>(value)?)),
            Numeric::U16 => Number::Unsigned(u64::from(*get::<u16>(value)?)),
            Numeric::U32 => Number::Unsigned(u64::from(*get::<u32>(value)?)),
            Numeric::U64 => Number::Unsigned(*get::<u64>(value)?),
            Numeric::USize => Number::Unsigned(*get::<usize>(value)? as u64),
            Numeric::F32 => Number::F32(*get::<f32>(value)?),
            Numeric::F64 => Number::F64(*get::<f64>(value)?),
        })
    }

    fn is_zero(self) -> bool {
        self.bits() == 0
    }

    /// Bit pattern, sign-extended for signed integers.
    fn bits(self) -> u64 {
        match self {
            Number::Bool(b) => u64::from(b),
            Number::Signed(i) => i as u64,
            Number::Unsigned(u) => u,
            Number::F32(f) => u64::from(f.to_bits()),
            Number::F64(f) => f.to_bits(),
        }
    }

    fn write(self, buf: &mut Vec<u8>, kind: WireKind) {
        match kind {
            WireKind::Zigzag32 => encode_varint(buf, u64::from(zigzag32(self.bits() as i32))),
            WireKind::Zigzag64 => encode_varint(buf, zigzag64(self.bits() as i64)),
            WireKind::Fixed32 => encode_fixed32(buf, self.bits() as u32),
            WireKind::Fixed64 => encode_fixed64(buf, self.bits()),
            WireKind::Varint | WireKind::Bytes => encode_varint(buf, self.bits()),
        }
    }
}

fn read_bytes<'mem>(
    value: Peek<'mem, 'static>,
    repr: BytesRepr,
) -> Result<Cow<'mem, [u8]>, EncodeError> {
    match repr {
        BytesRepr::Vec => value
            .get::<Vec<u8>>()
            .map(|v| Cow::Borrowed(v.as_slice()))
            .map_err(EncodeError::reflect),
        BytesRepr::Slice => value
            .get::<&'static [u8]>()
            .map(|s| Cow::Borrowed(*s))
            .map_err(EncodeError::reflect),
        BytesRepr::Array(len) => {
            let list = value.into_list_like().map_err(EncodeError::reflect)?;
            let mut bytes = Vec::with_capacity(len);
            for item in list.iter() {
                bytes.push(*item.get::<u8>().map_err(EncodeError::reflect)?);
            }
            Ok(Cow::Owned(bytes))
        }
    }
}

/// Follows `Box`, `Arc` and `Rc` to the value they hold.
fn deref_pointer<'mem>(value: Peek<'mem, 'static>) -> Result<Peek<'mem, 'static>, EncodeError> {
    match value.shape().def {
        Def::Pointer(_) => {
            let pointer = value.into_pointer().map_err(EncodeError::reflect)?;
            let inner = pointer
                .borrow_inner()
                .ok_or_else(|| not_readable(value, "pointer target"))?;
            deref_pointer(inner)
        }
        _ => Ok(value),
    }
}

fn check_fixed_width(codec: &CustomCodec, kind: WireKind, len: usize) -> Result<(), EncodeError> {
    let expected = match kind {
        WireKind::Fixed32 => 4,
        WireKind::Fixed64 => 8,
        _ => return Ok(()),
    };
    if len == expected {
        Ok(())
    } else {
        Err(EncodeError::FixedWidth {
            type_name: codec.type_name(),
            wire_type: kind.wire_type(),
            len,
        })
    }
}

fn not_readable(value: Peek<'_, 'static>, what: &str) -> EncodeError {
    EncodeError::Reflect(format!("cannot read {} as {what}", value.shape()))
}
