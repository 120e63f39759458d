//! Scalar fields, presence and field ordering, checked against prost.

use eyre::Result;
use facet::Facet;
use facet_proto3 as proto3;
use facet_proto3::to_vec;
use prost::Message;

#[derive(Facet, Debug, Default)]
struct Scalars {
    // declared out of tag order on purpose
    #[facet(proto3::wire = "bytes,6")]
    name: String,
    #[facet(proto3::wire = "varint,1")]
    small: i32,
    #[facet(proto3::wire = "zigzag64,2")]
    delta: i64,
    #[facet(proto3::wire = "fixed32,3")]
    id: u32,
    #[facet(proto3::wire = "fixed64,4")]
    ratio: f64,
    #[facet(proto3::wire = "varint,5")]
    on: bool,
    #[facet(proto3::wire = "bytes,7")]
    blob: Vec<u8>,
    #[facet(proto3::wire = "varint,8")]
    big: u64,
    #[facet(proto3::wire = "fixed64,9")]
    stamp: i64,
    #[facet(proto3::wire = "fixed32,10")]
    weight: f32,
    #[facet(proto3::wire = "zigzag32,11")]
    offset: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
struct PScalars {
    #[prost(int32, tag = "1")]
    small: i32,
    #[prost(sint64, tag = "2")]
    delta: i64,
    #[prost(fixed32, tag = "3")]
    id: u32,
    #[prost(double, tag = "4")]
    ratio: f64,
    #[prost(bool, tag = "5")]
    on: bool,
    #[prost(string, tag = "6")]
    name: String,
    #[prost(bytes = "vec", tag = "7")]
    blob: Vec<u8>,
    #[prost(uint64, tag = "8")]
    big: u64,
    #[prost(sfixed64, tag = "9")]
    stamp: i64,
    #[prost(float, tag = "10")]
    weight: f32,
    #[prost(sint32, tag = "11")]
    offset: i32,
}

#[facet_testhelpers::test]
fn scalars_match_prost() -> Result<()> {
    let value = Scalars {
        name: "héllo".to_string(),
        small: -7,
        delta: -300,
        id: 0xDEAD_BEEF,
        ratio: 1.5,
        on: true,
        blob: vec![0, 1, 2, 255],
        big: u64::MAX,
        stamp: -2,
        weight: -0.25,
        offset: i32::MIN,
    };
    let reference = PScalars {
        name: value.name.clone(),
        small: value.small,
        delta: value.delta,
        id: value.id,
        ratio: value.ratio,
        on: value.on,
        blob: value.blob.clone(),
        big: value.big,
        stamp: value.stamp,
        weight: value.weight,
        offset: value.offset,
    };

    let ours = to_vec(&value)?;
    assert_eq!(ours, reference.encode_to_vec());
    assert_eq!(PScalars::decode(ours.as_slice())?, reference);
    Ok(())
}

#[facet_testhelpers::test]
fn all_zero_record_is_empty() -> Result<()> {
    assert!(to_vec(&Scalars::default())?.is_empty());
    Ok(())
}

#[facet_testhelpers::test]
fn negative_int32_takes_ten_bytes() -> Result<()> {
    let value = Scalars {
        small: -1,
        ..Default::default()
    };
    assert_eq!(
        to_vec(&value)?,
        [0x08, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]
    );
    Ok(())
}

#[facet_testhelpers::test]
fn negative_zero_float_is_written() -> Result<()> {
    let value = Scalars {
        ratio: -0.0,
        ..Default::default()
    };
    assert_eq!(
        to_vec(&value)?,
        [0x21, 0, 0, 0, 0, 0, 0, 0, 0x80]
    );
    Ok(())
}

#[derive(Facet, Debug, Default)]
struct Narrow {
    #[facet(proto3::wire = "varint,1")]
    tiny: u8,
    #[facet(proto3::wire = "varint,2")]
    short: i16,
    #[facet(proto3::wire = "fixed64,3")]
    widened: u16,
    #[facet(proto3::wire = "zigzag64,4")]
    word: isize,
    #[facet(proto3::wire = "varint,5")]
    count: usize,
}

#[facet_testhelpers::test]
fn narrow_integers_widen() -> Result<()> {
    let value = Narrow {
        tiny: 200,
        short: -2,
        widened: 1,
        word: -1,
        count: 128,
    };
    let mut expected = vec![0x08, 0xc8, 0x01, 0x10];
    expected.extend_from_slice(&[0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
    expected.extend_from_slice(&[0x19, 1, 0, 0, 0, 0, 0, 0, 0]);
    expected.extend_from_slice(&[0x20, 0x01]);
    expected.extend_from_slice(&[0x28, 0x80, 0x01]);
    assert_eq!(to_vec(&value)?, expected);
    Ok(())
}

#[derive(Facet, Debug, Default)]
struct Presence {
    #[facet(proto3::wire = "varint,1")]
    count: Option<i32>,
    #[facet(proto3::wire = "bytes,2")]
    label: Option<String>,
    #[facet(proto3::wire = "fixed64,3")]
    score: Option<f64>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct PPresence {
    #[prost(int32, optional, tag = "1")]
    count: Option<i32>,
    #[prost(string, optional, tag = "2")]
    label: Option<String>,
    #[prost(double, optional, tag = "3")]
    score: Option<f64>,
}

#[facet_testhelpers::test]
fn some_zero_is_written() -> Result<()> {
    let value = Presence {
        count: Some(0),
        label: Some(String::new()),
        score: Some(0.0),
    };
    let reference = PPresence {
        count: Some(0),
        label: Some(String::new()),
        score: Some(0.0),
    };
    let ours = to_vec(&value)?;
    assert_eq!(ours, reference.encode_to_vec());
    assert_eq!(&ours[..4], &[0x08, 0x00, 0x12, 0x00]);
    Ok(())
}

#[facet_testhelpers::test]
fn none_is_not_written() -> Result<()> {
    assert!(to_vec(&Presence::default())?.is_empty());
    Ok(())
}

#[derive(Facet, Debug, Default)]
struct Skipped {
    #[facet(proto3::wire = "varint,1")]
    kept: u32,
    #[facet(proto3::wire = "-")]
    ignored: String,
    #[facet(skip)]
    cached: String,
}

#[facet_testhelpers::test]
fn skipped_fields_are_left_out() -> Result<()> {
    let value = Skipped {
        kept: 3,
        ignored: "no".into(),
        cached: "also no".into(),
    };
    assert_eq!(to_vec(&value)?, [0x08, 0x03]);

    let schema = proto3::SchemaRegistry::global().schema::<Skipped>()?;
    assert_eq!(schema.fields().len(), 1);
    Ok(())
}

#[derive(Facet, Debug)]
struct Borrowed {
    #[facet(proto3::wire = "bytes,1")]
    text: &'static str,
    #[facet(proto3::wire = "bytes,2")]
    raw: &'static [u8],
    #[facet(proto3::wire = "bytes,3")]
    key: [u8; 4],
}

#[facet_testhelpers::test]
fn borrowed_text_and_byte_arrays() -> Result<()> {
    let value = Borrowed {
        text: "hi",
        raw: &[9, 8],
        key: [0, 0, 0, 0],
    };
    assert_eq!(
        to_vec(&value)?,
        [
            0x0a, 0x02, b'h', b'i', //
            0x12, 0x02, 9, 8, //
            0x1a, 0x04, 0, 0, 0, 0,
        ]
    );
    Ok(())
}

#[derive(Facet, Debug)]
struct HighTag {
    #[facet(proto3::wire = "varint,536870911")]
    last: u32,
}

#[facet_testhelpers::test]
fn largest_tag_uses_five_key_bytes() -> Result<()> {
    assert_eq!(
        to_vec(&HighTag { last: 1 })?,
        [0xf8, 0xff, 0xff, 0xff, 0x0f, 0x01]
    );
    Ok(())
}

#[facet_testhelpers::test]
fn to_writer_appends() -> Result<()> {
    let mut buf = vec![0xaa];
    proto3::to_writer(&HighTag { last: 2 }, &mut buf)?;
    assert_eq!(buf, [0xaa, 0xf8, 0xff, 0xff, 0xff, 0x0f, 0x02]);
    Ok(())
}
