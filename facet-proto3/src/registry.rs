//! Schema compilation and the registry that caches compiled schemas.
//!
//! A record type is compiled the first time it is encoded. Compilation reads
//! each field's `proto3::wire` metadata, picks the field's storage (value,
//! option, sequence, array, map) and element (number, text, bytes, record,
//! self-encoding type), validates the pair against the wire keyword and
//! stores the result as a [`FieldDescriptor`]. The registry keeps every
//! compiled [`Schema`] for its lifetime.
//!
//! Records that refer to themselves (directly or through other records) are
//! handled by inserting an empty schema before the fields are compiled, so the
//! inner reference resolves to the schema under construction.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use facet_core::{ConstTypeId, Def, Facet, Field, ScalarType, Shape, Type, UserType};
use facet_reflect::Peek;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::custom::{Appender, CustomCodec, Marshaler};
use crate::descriptor::{
    BytesRepr, Element, FieldDescriptor, MapEntry, MessageRef, Metadata, Numeric, Schema, Storage,
    WireKind,
};
use crate::encoder::{
    EncodeFn, Encoder, enc_map, enc_nothing, enc_optional, enc_packed, enc_repeated, enc_value,
};
use crate::error::{EncodeError, SchemaError};
use crate::pool::{BufferPool, PoolStats, PooledBuf};
use crate::text;
use crate::well_known::{Timestamp, WellKnown};
use crate::wire::TagCode;

/// Attribute namespace read from field annotations.
const NS: &str = "proto3";

/// What to do with a field whose type has no encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnsupportedFieldPolicy {
    /// Fail compilation with [`SchemaError::Unsupported`].
    #[default]
    Reject,
    /// Log a warning and leave the field out of the schema; it is never encoded.
    Skip,
}

/// Settings for a [`SchemaRegistry`].
///
/// ```
/// use facet_proto3::{RegistryConfig, SchemaRegistry, UnsupportedFieldPolicy};
///
/// let registry = SchemaRegistry::new(
///     RegistryConfig::default()
///         .unsupported_fields(UnsupportedFieldPolicy::Skip)
///         .pool_capacity(4),
/// );
/// # let _ = registry;
/// ```
#[derive(Clone)]
pub struct RegistryConfig {
    unsupported: UnsupportedFieldPolicy,
    pool_capacity: usize,
    buffer_capacity: usize,
    custom: HashMap<ConstTypeId, CustomCodec>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            unsupported: UnsupportedFieldPolicy::Reject,
            pool_capacity: 16,
            buffer_capacity: 256,
            custom: HashMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Sets the policy for fields without an encoder.
    pub fn unsupported_fields(mut self, policy: UnsupportedFieldPolicy) -> Self {
        self.unsupported = policy;
        self
    }

    /// Sets how many idle buffers the pool keeps.
    pub fn pool_capacity(mut self, buffers: usize) -> Self {
        self.pool_capacity = buffers;
        self
    }

    /// Sets the initial capacity of freshly allocated pool buffers.
    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Registers `T` as encoding itself through [`Marshaler`].
    pub fn marshaler<T: Marshaler + Facet<'static>>(mut self) -> Self {
        self.custom.insert(T::SHAPE.id, CustomCodec::marshaler::<T>());
        self
    }

    /// Registers `T` as encoding itself through [`Appender`].
    pub fn appender<T: Appender + Facet<'static>>(mut self) -> Self {
        self.custom.insert(T::SHAPE.id, CustomCodec::appender::<T>());
        self
    }
}

/// Compiles and caches record schemas, and encodes values with them.
///
/// Lookups take a shared lock; compiling a new type takes the exclusive lock
/// for the duration of that type's compilation, including any records it
/// pulls in. Compiled schemas are immutable.
pub struct SchemaRegistry {
    cache: RwLock<HashMap<ConstTypeId, Arc<Schema>>>,
    custom: HashMap<ConstTypeId, CustomCodec>,
    unsupported: UnsupportedFieldPolicy,
    pool: BufferPool,
}

static GLOBAL: LazyLock<SchemaRegistry> = LazyLock::new(SchemaRegistry::default);

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SchemaRegistry {
    /// Creates a registry with the well-known types already installed.
    pub fn new(config: RegistryConfig) -> Self {
        let mut cache = HashMap::new();
        for (shape, which) in [
            (Timestamp::SHAPE, WellKnown::Timestamp),
            (<core::time::Duration as Facet>::SHAPE, WellKnown::Duration),
        ] {
            cache.insert(shape.id, Schema::synthesized(shape, which));
        }

        Self {
            cache: RwLock::new(cache),
            custom: config.custom,
            unsupported: config.unsupported,
            pool: BufferPool::new(config.pool_capacity, config.buffer_capacity),
        }
    }

    /// The process-wide registry used by [`to_vec`](crate::to_vec).
    pub fn global() -> &'static SchemaRegistry {
        &GLOBAL
    }

    /// Returns the schema for `T`, compiling it on first use.
    pub fn schema<T: Facet<'static>>(&self) -> Result<Arc<Schema>, SchemaError> {
        self.schema_for_shape(T::SHAPE)
    }

    /// Returns the schema for `shape`, compiling it on first use.
    pub fn schema_for_shape(&self, shape: &'static Shape) -> Result<Arc<Schema>, SchemaError> {
        if let Some(schema) = self.cache.read().get(&shape.id) {
            return Ok(schema.clone());
        }

        let mut cache = self.cache.write();
        let mut inserted = Vec::new();
        let result = Compiler {
            registry: self,
            cache: &mut cache,
            inserted: &mut inserted,
        }
        .resolve(shape);

        match &result {
            Ok(schema) => debug!(
                "Compiled schema for {} ({} fields, {} new types)",
                shape,
                schema.fields().len(),
                inserted.len()
            ),
            Err(err) => {
                debug!("Compiling {} failed: {}", shape, err);
                for id in &inserted {
                    cache.remove(id);
                }
            }
        }
        result
    }

    /// Number of schemas held, including the well-known ones.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// True if nothing beyond the well-known types has been compiled.
    pub fn is_empty(&self) -> bool {
        self.len() <= 2
    }

    /// Renders the `message` block for `T`.
    pub fn schema_text<T: Facet<'static>>(&self) -> Result<String, SchemaError> {
        let schema = self.schema::<T>()?;
        let mut out = String::new();
        text::render_message(&mut out, schema.message_name(), &schema);
        Ok(out)
    }

    /// Renders a `.proto` file with `T` and every record it reaches.
    pub fn schema_text_full<T: Facet<'static>>(&self) -> Result<String, SchemaError> {
        let schema = self.schema::<T>()?;
        Ok(text::render_file(&schema))
    }

    /// Pool counters for [`marshal_pooled`](Self::marshal_pooled).
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Encodes `value` into a new buffer.
    pub fn marshal<T: Facet<'static>>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_root(Peek::new(value), &mut buf)?;
        Ok(buf)
    }

    /// Appends the encoding of `value` to `buf`. On error `buf` is left as it
    /// was.
    pub fn marshal_into<T: Facet<'static>>(
        &self,
        value: &T,
        buf: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        let start = buf.len();
        let result = self.encode_root(Peek::new(value), buf);
        if result.is_err() {
            buf.truncate(start);
        }
        result
    }

    /// Encodes `value` into a buffer drawn from the registry's pool.
    pub fn marshal_pooled<T: Facet<'static>>(
        &self,
        value: &T,
    ) -> Result<PooledBuf<'_>, EncodeError> {
        let mut buf = self.pool.get();
        match self.encode_root(Peek::new(value), &mut buf) {
            Ok(()) => Ok(PooledBuf::new(buf, &self.pool)),
            Err(err) => {
                self.pool.put(buf);
                Err(err)
            }
        }
    }

    fn encode_root(&self, value: Peek<'_, 'static>, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
        trace!("Marshaling {}", value.shape());
        let value = unwrap_root(value)?;

        if let Some(codec) = self.custom.get(&value.shape().id) {
            return Encoder::new(buf).encode_custom_payload(codec, value);
        }

        let schema = self.schema_for_shape(value.shape()).map_err(|err| match err {
            SchemaError::NotRecord { type_name } if type_name == value.shape().type_identifier => {
                EncodeError::NotRecord { type_name }
            }
            err => EncodeError::Schema(err),
        })?;
        Encoder::new(buf).encode_message(&schema, value)
    }
}

/// Peels one `Option` and one pointer off the top-level value.
fn unwrap_root<'mem>(value: Peek<'mem, 'static>) -> Result<Peek<'mem, 'static>, EncodeError> {
    let value = match value.shape().def {
        Def::Option(_) => {
            let option = value.into_option().map_err(EncodeError::reflect)?;
            option.value().ok_or(EncodeError::NilInput)?
        }
        _ => value,
    };
    match value.shape().def {
        Def::Pointer(_) => {
            let pointer = value.into_pointer().map_err(EncodeError::reflect)?;
            pointer.borrow_inner().ok_or(EncodeError::NilInput)
        }
        _ => Ok(value),
    }
}

/// How a field's value holds its elements.
struct Layout {
    storage: Storage,
    element: &'static Shape,
    nullable: bool,
    by_ref: bool,
}

/// One compilation run, holding the registry's write lock.
struct Compiler<'a> {
    registry: &'a SchemaRegistry,
    cache: &'a mut HashMap<ConstTypeId, Arc<Schema>>,
    inserted: &'a mut Vec<ConstTypeId>,
}

impl Compiler<'_> {
    fn resolve(&mut self, shape: &'static Shape) -> Result<Arc<Schema>, SchemaError> {
        if let Some(schema) = self.cache.get(&shape.id) {
            return Ok(schema.clone());
        }
        let Type::User(UserType::Struct(st)) = shape.ty else {
            return Err(SchemaError::NotRecord {
                type_name: shape.type_identifier,
            });
        };

        trace!("Compiling {} ({} fields)", shape, st.fields.len());
        let schema = Schema::placeholder(shape);
        self.cache.insert(shape.id, schema.clone());
        self.inserted.push(shape.id);

        let owner = shape.type_identifier;
        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(st.fields.len());
        let mut seen: HashMap<u32, &'static str> = HashMap::new();

        for (index, field) in st.fields.iter().enumerate() {
            if field.has_builtin_attr("skip") {
                trace!("{}.{} skipped", owner, field.name);
                continue;
            }
            let raw = attr_str(field, "wire").ok_or_else(|| SchemaError::MissingMetadata {
                owner,
                field: field.name.to_string(),
            })?;
            let Metadata::Wire { kind, tag } = Metadata::parse(owner, field.name, raw)? else {
                trace!("{}.{} skipped", owner, field.name);
                continue;
            };
            if let Some(first) = seen.insert(tag, field.name) {
                return Err(SchemaError::DuplicateTag {
                    owner,
                    tag,
                    first,
                    second: field.name,
                });
            }

            match self.field_descriptor(owner, field, index, kind, tag) {
                Ok(desc) => {
                    trace!("{}.{} => {:?}", owner, field.name, desc);
                    fields.push(desc);
                }
                Err(SchemaError::Unsupported { type_name, .. })
                    if self.registry.unsupported == UnsupportedFieldPolicy::Skip =>
                {
                    warn!(
                        "{}.{}: no encoder for {}, field will not be encoded",
                        owner, field.name, type_name
                    );
                }
                Err(err) => return Err(err),
            }
        }

        fields.sort_by_key(|desc| desc.tag);
        let _ = schema.fields.set(fields.into_boxed_slice());
        Ok(schema)
    }

    fn field_descriptor(
        &mut self,
        owner: &'static str,
        field: &'static Field,
        index: usize,
        kind: WireKind,
        tag: u32,
    ) -> Result<FieldDescriptor, SchemaError> {
        let shape = field.shape();
        let layout = self.layout(shape);

        if layout.storage == Storage::Map {
            return self.map_descriptor(owner, field, index, kind, tag);
        }
        if layout.storage == Storage::Array(0) {
            return Ok(FieldDescriptor {
                name: field.name,
                tag,
                kind,
                tagcode: TagCode::new(tag, kind.wire_type()),
                index,
                storage: layout.storage,
                nullable: false,
                element: Element::Nothing,
                enc: enc_nothing,
                proto_type: format!("repeated {}", element_type_name(layout.element)),
            });
        }

        let (element, elem_type) =
            self.element(owner, field.name, layout.element, kind, layout.by_ref)?;

        let repeated = matches!(layout.storage, Storage::Repeated | Storage::Array(_));
        let packed = repeated && matches!(element, Element::Numeric(_));
        if packed && layout.nullable {
            return Err(unsupported(owner, field.name, shape));
        }

        let enc: EncodeFn = match layout.storage {
            Storage::Value => enc_value,
            Storage::Optional => enc_optional,
            Storage::Repeated | Storage::Array(_) if packed => enc_packed,
            Storage::Repeated | Storage::Array(_) => enc_repeated,
            Storage::Map => enc_map,
        };
        let wire_type = if packed {
            crate::wire::WireType::Bytes
        } else {
            kind.wire_type()
        };
        let proto_type = if repeated {
            format!("repeated {elem_type}")
        } else {
            elem_type
        };

        Ok(FieldDescriptor {
            name: field.name,
            tag,
            kind,
            tagcode: TagCode::new(tag, wire_type),
            index,
            storage: layout.storage,
            nullable: layout.nullable,
            element,
            enc,
            proto_type,
        })
    }

    fn map_descriptor(
        &mut self,
        owner: &'static str,
        field: &'static Field,
        index: usize,
        kind: WireKind,
        tag: u32,
    ) -> Result<FieldDescriptor, SchemaError> {
        let Def::Map(map_def) = field.shape().def else {
            return Err(unsupported(owner, field.name, field.shape()));
        };
        if kind != WireKind::Bytes {
            return Err(SchemaError::WireMismatch {
                owner,
                field: field.name.to_string(),
                element: field.shape().to_string(),
                keyword: kind.keyword(),
            });
        }

        let key = self.entry_half(owner, field, "key", 1, map_def.k())?;
        if !matches!(key.element, Element::Text)
            && !matches!(key.element, Element::Numeric(n) if n.is_integral())
        {
            return Err(unsupported(owner, field.name, map_def.k()));
        }
        let val = self.entry_half(owner, field, "val", 2, map_def.v())?;

        let proto_type = format!("map<{}, {}>", key.proto_type, val.proto_type);
        Ok(FieldDescriptor {
            name: field.name,
            tag,
            kind,
            tagcode: TagCode::new(tag, kind.wire_type()),
            index,
            storage: Storage::Map,
            nullable: false,
            element: Element::MapEntry(Box::new(MapEntry { key, val })),
            enc: enc_map,
            proto_type,
        })
    }

    /// Compiles the key (`proto3::key`) or value (`proto3::val`) of a map
    /// field as a field of the synthetic entry message.
    fn entry_half(
        &mut self,
        owner: &'static str,
        field: &'static Field,
        attr: &'static str,
        expected_tag: u32,
        shape: &'static Shape,
    ) -> Result<FieldDescriptor, SchemaError> {
        let label = format!("{}.{}", field.name, attr);
        let raw = attr_str(field, attr).ok_or_else(|| SchemaError::MissingMetadata {
            owner,
            field: label.clone(),
        })?;
        let Metadata::Wire { kind, tag } = Metadata::parse(owner, &label, raw)? else {
            return Err(SchemaError::InvalidMetadata {
                owner,
                field: label,
                metadata: raw.to_string(),
                reason: "map keys and values cannot be skipped",
            });
        };
        if tag != expected_tag {
            return Err(SchemaError::InvalidMetadata {
                owner,
                field: label,
                metadata: raw.to_string(),
                reason: if expected_tag == 1 {
                    "map keys use tag 1"
                } else {
                    "map values use tag 2"
                },
            });
        }

        let (shape, by_ref) = peel_pointer(shape);
        let (element, proto_type) = self.element(owner, &label, shape, kind, by_ref)?;
        Ok(FieldDescriptor {
            name: if expected_tag == 1 { "key" } else { "value" },
            tag,
            kind,
            tagcode: TagCode::new(tag, kind.wire_type()),
            index: 0,
            storage: Storage::Value,
            nullable: false,
            element,
            enc: enc_value,
            proto_type,
        })
    }

    /// Splits a field type into storage and element.
    fn layout(&self, shape: &'static Shape) -> Layout {
        let value = |element, by_ref| Layout {
            storage: Storage::Value,
            element,
            nullable: false,
            by_ref,
        };
        if self.registry.custom.contains_key(&shape.id) || bytes_repr(shape).is_some() {
            return value(shape, false);
        }

        match shape.def {
            Def::Option(option_def) => {
                let (element, by_ref) = peel_pointer(option_def.t());
                Layout {
                    storage: Storage::Optional,
                    element,
                    nullable: false,
                    by_ref,
                }
            }
            Def::Pointer(pointer_def) => match pointer_def.pointee() {
                Some(pointee) if is_struct(pointee) => value(pointee, true),
                _ => value(shape, false),
            },
            Def::List(list_def) => self.sequence(Storage::Repeated, list_def.t()),
            Def::Array(array_def) => self.sequence(Storage::Array(array_def.n), array_def.t()),
            Def::Map(map_def) => Layout {
                storage: Storage::Map,
                element: map_def.v(),
                nullable: false,
                by_ref: false,
            },
            _ => value(shape, false),
        }
    }

    fn sequence(&self, storage: Storage, element: &'static Shape) -> Layout {
        if self.registry.custom.contains_key(&element.id) {
            return Layout {
                storage,
                element,
                nullable: false,
                by_ref: false,
            };
        }
        let (element, nullable) = match element.def {
            Def::Option(option_def) => (option_def.t(), true),
            _ => (element, false),
        };
        let (element, by_ref) = peel_pointer(element);
        Layout {
            storage,
            element,
            nullable,
            by_ref,
        }
    }

    /// Resolves an element type and checks it against the wire keyword.
    /// Returns the element and its proto3 type name.
    fn element(
        &mut self,
        owner: &'static str,
        field: &str,
        shape: &'static Shape,
        kind: WireKind,
        by_ref: bool,
    ) -> Result<(Element, String), SchemaError> {
        let mismatch = || SchemaError::WireMismatch {
            owner,
            field: field.to_string(),
            element: shape.to_string(),
            keyword: kind.keyword(),
        };
        let require_bytes = || {
            if kind == WireKind::Bytes {
                Ok(())
            } else {
                Err(mismatch())
            }
        };

        if let Some(codec) = self.registry.custom.get(&shape.id) {
            let name = match kind {
                WireKind::Bytes => codec.type_name(),
                WireKind::Varint => "uint64",
                WireKind::Zigzag32 => "sint32",
                WireKind::Zigzag64 => "sint64",
                WireKind::Fixed32 => "fixed32",
                WireKind::Fixed64 => "fixed64",
            };
            return Ok((Element::Custom(*codec), name.to_string()));
        }

        if let Some(schema) = self.cache.get(&shape.id).filter(|s| s.is_well_known()) {
            require_bytes()?;
            let name = schema.message_name().to_string();
            let message = MessageRef {
                schema: Arc::downgrade(schema),
                by_ref,
            };
            return Ok((Element::Message(message), name));
        }

        if let Some(repr) = bytes_repr(shape) {
            require_bytes()?;
            return Ok((Element::Bytes(repr), "bytes".to_string()));
        }

        if let Some(scalar) = shape.scalar_type() {
            if matches!(
                scalar,
                ScalarType::Str | ScalarType::String | ScalarType::CowStr
            ) {
                require_bytes()?;
                return Ok((Element::Text, "string".to_string()));
            }
            let Some(numeric) = Numeric::from_scalar(scalar) else {
                return Err(unsupported(owner, field, shape));
            };
            let name = numeric.proto_type(kind).ok_or_else(|| mismatch())?;
            return Ok((Element::Numeric(numeric), name.to_string()));
        }

        if is_struct(shape) {
            require_bytes()?;
            let schema = self.resolve(shape)?;
            let name = schema.message_name().to_string();
            let message = MessageRef {
                schema: Arc::downgrade(&schema),
                by_ref,
            };
            return Ok((Element::Message(message), name));
        }

        Err(unsupported(owner, field, shape))
    }
}

fn attr_str(field: &Field, key: &str) -> Option<&'static str> {
    field
        .get_attr(Some(NS), key)
        .and_then(|attr| attr.get_as::<&'static str>().copied())
}

fn bytes_repr(shape: &'static Shape) -> Option<BytesRepr> {
    if shape.is_type::<Vec<u8>>() {
        return Some(BytesRepr::Vec);
    }
    if shape.is_type::<&'static [u8]>() {
        return Some(BytesRepr::Slice);
    }
    match shape.def {
        Def::Array(array_def) if array_def.t().is_type::<u8>() => {
            Some(BytesRepr::Array(array_def.n))
        }
        _ => None,
    }
}

fn is_struct(shape: &'static Shape) -> bool {
    matches!(shape.ty, Type::User(UserType::Struct(_)))
}

/// Strips `Box`/`Arc`/`Rc` around a record.
fn peel_pointer(shape: &'static Shape) -> (&'static Shape, bool) {
    match shape.def {
        Def::Pointer(pointer_def) => match pointer_def.pointee() {
            Some(pointee) if is_struct(pointee) => (pointee, true),
            _ => (shape, false),
        },
        _ => (shape, false),
    }
}

fn unsupported(owner: &'static str, field: &str, shape: &'static Shape) -> SchemaError {
    SchemaError::Unsupported {
        owner,
        field: field.to_string(),
        type_name: shape.to_string(),
    }
}

/// Best-effort name for the element of a zero-length array, used only in
/// schema text.
fn element_type_name(shape: &'static Shape) -> String {
    if let Some(numeric) = shape.scalar_type().and_then(Numeric::from_scalar) {
        if let Some(name) = numeric.proto_type(WireKind::Varint) {
            return name.to_string();
        }
    }
    shape.type_identifier.to_string()
}
