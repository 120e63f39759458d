use core::fmt;

use crate::wire::WireType;

/// Error type returned by [`Marshaler`](crate::Marshaler),
/// [`Appender`](crate::Appender) and [`Unmarshaler`](crate::Unmarshaler)
/// implementations.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Errors found while compiling a record type into a [`Schema`](crate::Schema).
///
/// These describe mistakes in the type's annotations, so they are reported
/// once per type and never depend on the value being encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A field has no `proto3::wire` attribute and is not skipped
    MissingMetadata {
        /// Record that owns the field
        owner: &'static str,
        /// Field name, or `name.key` / `name.val` for map halves
        field: String,
    },
    /// A metadata string could not be parsed
    InvalidMetadata {
        /// Record that owns the field
        owner: &'static str,
        /// Field name
        field: String,
        /// The offending metadata string
        metadata: String,
        /// What is wrong with it
        reason: &'static str,
    },
    /// A tag was not a positive integer in the proto3 field number range
    InvalidTag {
        /// Record that owns the field
        owner: &'static str,
        /// Field name
        field: String,
        /// The tag text as written
        tag: String,
    },
    /// Two fields of one record share a tag
    DuplicateTag {
        /// Record that owns both fields
        owner: &'static str,
        /// The shared tag
        tag: u32,
        /// Field declared first
        first: &'static str,
        /// Field declared second
        second: &'static str,
    },
    /// The wire keyword cannot carry the field's element type
    WireMismatch {
        /// Record that owns the field
        owner: &'static str,
        /// Field name
        field: String,
        /// Element type name
        element: String,
        /// Keyword from the metadata
        keyword: &'static str,
    },
    /// No encoder exists for this field's shape
    Unsupported {
        /// Record that owns the field
        owner: &'static str,
        /// Field name
        field: String,
        /// The field's type
        type_name: String,
    },
    /// A schema was requested for something that is not a record
    NotRecord {
        /// The type that was offered
        type_name: &'static str,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::MissingMetadata { owner, field } => {
                write!(f, "{owner}.{field} has no proto3::wire metadata")
            }
            SchemaError::InvalidMetadata {
                owner,
                field,
                metadata,
                reason,
            } => write!(f, "{owner}.{field}: invalid metadata {metadata:?}: {reason}"),
            SchemaError::InvalidTag { owner, field, tag } => {
                write!(f, "{owner}.{field}: invalid tag {tag:?}")
            }
            SchemaError::DuplicateTag {
                owner,
                tag,
                first,
                second,
            } => write!(
                f,
                "{owner}: duplicate tag {tag} on fields {first} and {second}"
            ),
            SchemaError::WireMismatch {
                owner,
                field,
                element,
                keyword,
            } => write!(f, "{owner}.{field}: {element} cannot be encoded as {keyword}"),
            SchemaError::Unsupported {
                owner,
                field,
                type_name,
            } => write!(f, "{owner}.{field}: no encoder for type {type_name}"),
            SchemaError::NotRecord { type_name } => {
                write!(f, "{type_name} is not a record type")
            }
        }
    }
}

impl core::error::Error for SchemaError {}

/// Errors returned when encoding a value.
///
/// Any error discards the bytes produced by the failing call.
#[derive(Debug)]
pub enum EncodeError {
    /// The top-level value was `None`
    NilInput,
    /// The top-level value was not a record
    NotRecord {
        /// The type that was offered
        type_name: &'static str,
    },
    /// The value's type failed to compile
    Schema(SchemaError),
    /// A repeated record field contained `None`
    RepeatedHasNil {
        /// Field name
        field: &'static str,
    },
    /// A self-encoding type reported an error
    Custom {
        /// The self-encoding type
        type_name: &'static str,
        /// The error it returned
        source: BoxError,
    },
    /// An [`Appender`](crate::Appender) shortened the buffer it was handed
    AppenderShrank {
        /// The self-encoding type
        type_name: &'static str,
        /// Buffer length before the call
        before: usize,
        /// Buffer length after the call
        after: usize,
    },
    /// A self-encoding type wrote a payload under a fixed-width key with the wrong length
    FixedWidth {
        /// The self-encoding type
        type_name: &'static str,
        /// The key's wire type
        wire_type: WireType,
        /// Bytes written
        len: usize,
    },
    /// A `core::time::Duration` is longer than `google.protobuf.Duration` allows
    DurationOutOfRange {
        /// Whole seconds in the duration
        seconds: u64,
    },
    /// Reflection failed to read a value
    Reflect(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::NilInput => write!(f, "nil input"),
            EncodeError::NotRecord { type_name } => {
                write!(f, "{type_name} is not a record or a reference to one")
            }
            EncodeError::Schema(err) => write!(f, "schema error: {err}"),
            EncodeError::RepeatedHasNil { field } => {
                write!(f, "repeated field {field} has nil element")
            }
            EncodeError::Custom { type_name, source } => {
                write!(f, "{type_name} failed to encode itself: {source}")
            }
            EncodeError::AppenderShrank {
                type_name,
                before,
                after,
            } => write!(
                f,
                "buggy append_proto3 implementation for {type_name}: buffer shrank from {before} to {after} bytes"
            ),
            EncodeError::FixedWidth {
                type_name,
                wire_type,
                len,
            } => write!(
                f,
                "{type_name} wrote {len} bytes for a {wire_type} field"
            ),
            EncodeError::DurationOutOfRange { seconds } => write!(
                f,
                "duration of {seconds}s exceeds the google.protobuf.Duration limit of {}s",
                crate::well_known::MAX_DURATION_SECS
            ),
            EncodeError::Reflect(msg) => write!(f, "reflection error: {msg}"),
        }
    }
}

impl core::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            EncodeError::Schema(err) => Some(err),
            EncodeError::Custom { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<SchemaError> for EncodeError {
    fn from(err: SchemaError) -> Self {
        EncodeError::Schema(err)
    }
}

impl EncodeError {
    pub(crate) fn reflect(err: impl fmt::Display) -> Self {
        EncodeError::Reflect(err.to_string())
    }
}
