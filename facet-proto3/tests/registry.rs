//! Schema compilation errors, registry configuration, pooling and schema text.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use facet::Facet;
use facet_proto3 as proto3;
use facet_proto3::{
    EncodeError, RegistryConfig, SchemaError, SchemaRegistry, Timestamp, UnsupportedFieldPolicy,
    WireKind,
};

#[derive(Facet, Debug, Default)]
struct NoMetadata {
    #[facet(proto3::wire = "varint,1")]
    a: u32,
    b: u32,
}

#[derive(Facet, Debug, Default)]
struct BadTag {
    #[facet(proto3::wire = "varint,0")]
    a: u32,
}

#[derive(Facet, Debug, Default)]
struct BadKind {
    #[facet(proto3::wire = "float,1")]
    a: f32,
}

#[derive(Facet, Debug, Default)]
struct TextAsVarint {
    #[facet(proto3::wire = "varint,1")]
    name: String,
}

#[derive(Facet, Debug, Default)]
struct FloatAsVarint {
    #[facet(proto3::wire = "varint,1")]
    ratio: f64,
}

#[derive(Facet, Debug, Default)]
struct UnsignedZigzag {
    #[facet(proto3::wire = "zigzag32,1")]
    count: u32,
}

#[facet_testhelpers::test]
fn metadata_errors() {
    let registry = SchemaRegistry::default();

    assert_eq!(
        registry.schema::<NoMetadata>().unwrap_err(),
        SchemaError::MissingMetadata {
            owner: "NoMetadata",
            field: "b".into(),
        }
    );
    assert!(matches!(
        registry.schema::<BadTag>().unwrap_err(),
        SchemaError::InvalidTag { ref tag, .. } if tag == "0"
    ));
    assert!(matches!(
        registry.schema::<BadKind>().unwrap_err(),
        SchemaError::InvalidMetadata { .. }
    ));
    for err in [
        registry.schema::<TextAsVarint>().unwrap_err(),
        registry.schema::<FloatAsVarint>().unwrap_err(),
        registry.schema::<UnsignedZigzag>().unwrap_err(),
    ] {
        assert!(
            matches!(err, SchemaError::WireMismatch { keyword, .. } if keyword != "bytes"),
            "{err}"
        );
    }

    let err = proto3::to_vec(&NoMetadata::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "schema error: NoMetadata.b has no proto3::wire metadata"
    );
}

#[derive(Facet, Debug, Default)]
struct Child {
    #[facet(proto3::wire = "varint,1")]
    x: u32,
}

#[derive(Facet, Debug, Default)]
struct Clash {
    #[facet(proto3::wire = "bytes,1")]
    child: Child,
    #[facet(proto3::wire = "varint,1")]
    other: u32,
}

#[facet_testhelpers::test]
fn duplicate_tag_rolls_back() -> Result<()> {
    let registry = SchemaRegistry::default();
    assert!(registry.is_empty());

    let err = registry.schema::<Clash>().unwrap_err();
    assert_eq!(
        err,
        SchemaError::DuplicateTag {
            owner: "Clash",
            tag: 1,
            first: "child",
            second: "other",
        }
    );
    // neither Clash nor the Child it pulled in stay cached
    assert!(registry.is_empty());

    registry.schema::<Child>()?;
    assert_eq!(registry.len(), 3);
    Ok(())
}

#[derive(Facet, Debug, Default)]
struct WithChar {
    #[facet(proto3::wire = "varint,1")]
    id: u32,
    #[facet(proto3::wire = "varint,2")]
    initial: char,
}

#[facet_testhelpers::test]
fn unsupported_field_policy() -> Result<()> {
    let strict = SchemaRegistry::default();
    assert!(matches!(
        strict.schema::<WithChar>().unwrap_err(),
        SchemaError::Unsupported { ref field, .. } if field == "initial"
    ));

    let lenient = SchemaRegistry::new(
        RegistryConfig::default().unsupported_fields(UnsupportedFieldPolicy::Skip),
    );
    let schema = lenient.schema::<WithChar>()?;
    assert_eq!(schema.fields().len(), 1);
    assert_eq!(
        lenient.marshal(&WithChar {
            id: 7,
            initial: 'x'
        })?,
        [0x08, 0x07]
    );
    Ok(())
}

#[derive(Facet, Debug, Default)]
struct Described {
    #[facet(proto3::wire = "zigzag32,3")]
    c: Vec<i32>,
    #[facet(proto3::wire = "varint,1")]
    a: u64,
    #[facet(proto3::wire = "bytes,2")]
    b: Option<String>,
}

#[facet_testhelpers::test]
fn descriptors_are_sorted_and_precomputed() -> Result<()> {
    let schema = SchemaRegistry::global().schema::<Described>()?;
    assert_eq!(schema.message_name(), "Described");
    assert!(!schema.is_well_known());

    let fields = schema.fields();
    let tags: Vec<_> = fields.iter().map(|f| f.tag()).collect();
    assert_eq!(tags, [1, 2, 3]);

    let c = schema.field_by_tag(3).expect("field c");
    assert_eq!(c.name(), "c");
    assert_eq!(c.kind(), WireKind::Zigzag32);
    assert_eq!(c.wire_type(), proto3::wire::WireType::Bytes);
    assert_eq!(c.tagcode(), &[0x1a]);
    assert_eq!(c.proto_type(), "repeated sint32");
    assert!(schema.field_by_tag(4).is_none());

    // the same Arc is handed out on every lookup
    let again = SchemaRegistry::global().schema::<Described>()?;
    assert!(Arc::ptr_eq(&schema, &again));
    Ok(())
}

#[facet_testhelpers::test]
fn concurrent_first_use_compiles_one_schema() -> Result<()> {
    let registry = SchemaRegistry::default();
    let value = Described {
        a: 1,
        b: Some("x".into()),
        c: vec![-1],
    };
    let expected = registry.marshal(&value)?;
    let fresh = SchemaRegistry::default();

    std::thread::scope(|scope| {
        let (fresh, value) = (&fresh, &value);
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(move || fresh.marshal(value)))
            .collect();
        for handle in handles {
            let bytes = handle.join().expect("thread panicked");
            assert_eq!(bytes.ok().as_deref(), Some(expected.as_slice()));
        }
    });
    assert_eq!(fresh.len(), 3);
    Ok(())
}

#[facet_testhelpers::test]
fn pooled_buffers_are_reused() -> Result<()> {
    let registry = SchemaRegistry::new(RegistryConfig::default().pool_capacity(2).buffer_capacity(64));
    let value = Described {
        a: 300,
        ..Default::default()
    };

    {
        let first = registry.marshal_pooled(&value)?;
        assert_eq!(&*first, &[0x08, 0xac, 0x02]);
    }
    let second = registry.marshal_pooled(&value)?;
    assert_eq!(second.as_ref(), &[0x08, 0xac, 0x02]);
    drop(second);

    let stats = registry.pool_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.returns, 2);

    let owned = registry.marshal_pooled(&value)?.into_vec();
    assert_eq!(owned, [0x08, 0xac, 0x02]);
    Ok(())
}

#[facet_testhelpers::test]
fn failed_marshal_leaves_buffer_alone() {
    let registry = SchemaRegistry::default();
    let mut buf = vec![9, 9];
    let err = registry
        .marshal_into(&NoMetadata::default(), &mut buf)
        .unwrap_err();
    assert!(matches!(err, EncodeError::Schema(_)));
    assert_eq!(buf, [9, 9]);
}

#[derive(Facet, Debug, Default)]
struct LineItem {
    #[facet(proto3::wire = "bytes,1")]
    sku: String,
    #[facet(proto3::wire = "varint,2")]
    qty: u32,
}

#[derive(Facet, Debug)]
struct Order {
    #[facet(proto3::wire = "varint,1")]
    id: u64,
    #[facet(proto3::wire = "bytes,2")]
    items: Vec<LineItem>,
    #[facet(proto3::wire = "bytes,3")]
    placed: Timestamp,
    #[facet(proto3::wire = "bytes,4", proto3::key = "bytes,1", proto3::val = "varint,2")]
    tags: BTreeMap<String, u32>,
    #[facet(proto3::wire = "zigzag32,5")]
    delta: Option<i32>,
    #[facet(proto3::wire = "fixed64,6")]
    weights: Vec<f64>,
    #[facet(proto3::wire = "bytes,7")]
    timeout: Duration,
    #[facet(proto3::wire = "bytes,8")]
    range: Span,
    #[facet(proto3::wire = "-")]
    note: String,
}

#[derive(Facet, Debug)]
struct Span {
    #[facet(proto3::wire = "varint,1")]
    start: u32,
    #[facet(proto3::wire = "varint,2")]
    end: u32,
}

#[facet_testhelpers::test]
fn schema_text_single_message() {
    insta::assert_snapshot!(proto3::schema_text::<Order>().unwrap(), @r"
    message Order {
      uint64 id = 1;
      repeated LineItem items = 2;
      google.protobuf.Timestamp placed = 3;
      map<string, uint32> tags = 4;
      sint32 delta = 5;
      repeated double weights = 6;
      google.protobuf.Duration timeout = 7;
      Span range = 8;
    }
    ");
}

#[facet_testhelpers::test]
fn schema_text_whole_file() {
    insta::assert_snapshot!(proto3::schema_text_full::<Order>().unwrap(), @r#"
    syntax = "proto3";

    import "google/protobuf/timestamp.proto";
    import "google/protobuf/duration.proto";

    message Order {
      uint64 id = 1;
      repeated LineItem items = 2;
      google.protobuf.Timestamp placed = 3;
      map<string, uint32> tags = 4;
      sint32 delta = 5;
      repeated double weights = 6;
      google.protobuf.Duration timeout = 7;
      Span range = 8;
    }

    message LineItem {
      string sku = 1;
      uint32 qty = 2;
    }

    message Span {
      uint32 start = 1;
      uint32 end = 2;
    }
    "#);
}
