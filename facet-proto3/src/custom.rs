//! Types that encode themselves.
//!
//! A type opts out of attribute-driven encoding by implementing [`Marshaler`]
//! or [`Appender`] and being registered with
//! [`RegistryConfig::marshaler`](crate::RegistryConfig::marshaler) or
//! [`RegistryConfig::appender`](crate::RegistryConfig::appender). Both traits
//! require [`Unmarshaler`], so a type can only take over its encoding if it
//! can also read it back.
//!
//! The implementation writes only the payload. The field's key and, for
//! `bytes` fields, the length prefix are written by the encoder.

use facet_core::{Facet, Shape};
use facet_reflect::Peek;

use crate::error::{BoxError, EncodeError};

/// Decodes a payload produced by the matching [`Marshaler`] or [`Appender`].
pub trait Unmarshaler {
    /// Replaces `self` with the value encoded in `bytes`.
    fn unmarshal_proto3(&mut self, bytes: &[u8]) -> Result<(), BoxError>;
}

/// Encodes a value into a freshly allocated payload.
pub trait Marshaler: Unmarshaler {
    /// Returns the payload for `self`.
    fn marshal_proto3(&self) -> Result<Vec<u8>, BoxError>;
}

/// Encodes a value by appending its payload to the caller's buffer.
///
/// Implementations must only append. Returning with `buf` shorter than it
/// was is reported as [`EncodeError::AppenderShrank`].
pub trait Appender: Unmarshaler {
    /// Appends the payload for `self` to `buf`.
    fn append_proto3(&self, buf: &mut Vec<u8>) -> Result<(), BoxError>;
}

pub(crate) type MarshalFn = for<'mem> fn(Peek<'mem, 'static>) -> Result<Vec<u8>, EncodeError>;
pub(crate) type AppendFn =
    for<'mem> fn(Peek<'mem, 'static>, &mut Vec<u8>) -> Result<(), EncodeError>;

#[derive(Clone, Copy)]
pub(crate) enum CustomStyle {
    Marshal(MarshalFn),
    Append(AppendFn),
}

/// A registered self-encoding type, resolved once and cached in descriptors.
#[derive(Clone, Copy)]
pub(crate) struct CustomCodec {
    pub(crate) shape: &'static Shape,
    pub(crate) style: CustomStyle,
}

impl CustomCodec {
    pub(crate) fn marshaler<T: Marshaler + Facet<'static>>() -> Self {
        Self {
            shape: T::SHAPE,
            style: CustomStyle::Marshal(marshal_erased::<T>),
        }
    }

    pub(crate) fn appender<T: Appender + Facet<'static>>() -> Self {
        Self {
            shape: T::SHAPE,
            style: CustomStyle::Append(append_erased::<T>),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.shape.type_identifier
    }
}

fn marshal_erased<T: Marshaler + Facet<'static>>(
    peek: Peek<'_, 'static>,
) -> Result<Vec<u8>, EncodeError> {
    let value = peek.get::<T>().map_err(EncodeError::reflect)?;
    value.marshal_proto3().map_err(|source| EncodeError::Custom {
        type_name: T::SHAPE.type_identifier,
        source,
    })
}

fn append_erased<T: Appender + Facet<'static>>(
    peek: Peek<'_, 'static>,
    buf: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let value = peek.get::<T>().map_err(EncodeError::reflect)?;
    let before = buf.len();
    value
        .append_proto3(buf)
        .map_err(|source| EncodeError::Custom {
            type_name: T::SHAPE.type_identifier,
            source,
        })?;
    if buf.len() < before {
        return Err(EncodeError::AppenderShrank {
            type_name: T::SHAPE.type_identifier,
            before,
            after: buf.len(),
        });
    }
    Ok(())
}
