//! `google.protobuf.Timestamp` and `google.protobuf.Duration`.
//!
//! Both messages are a pair of varints: `seconds` at tag 1 and `nanos` at tag
//! 2, each left out when zero. [`Timestamp`] is the Rust-side timestamp type;
//! `core::time::Duration` fields encode as `google.protobuf.Duration`.

use std::time::{SystemTime, UNIX_EPOCH};

use facet::Facet;

use crate::error::EncodeError;
use crate::wire::{TagCode, WireType, encode_varint};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Largest `seconds` a `google.protobuf.Duration` may carry, about 10,000 years.
pub const MAX_DURATION_SECS: u64 = 315_576_000_000;

/// A point in time as whole seconds since the Unix epoch plus a non-negative
/// nanosecond remainder.
///
/// Encodes as `google.protobuf.Timestamp`. Any field of this type must use
/// `bytes` metadata, like any other message.
///
/// The fields are private so `nanos` stays in `0..1_000_000_000`; build one
/// with [`Timestamp::new`], [`Timestamp::from_unix_nanos`] or from a
/// [`SystemTime`].
#[derive(Facet, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    seconds: i64,
    nanos: i32,
}

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp {
        seconds: 0,
        nanos: 0,
    };

    /// Builds a timestamp from nanoseconds since the epoch. Seconds are
    /// floored, so instants before the epoch still get positive nanos.
    pub const fn from_unix_nanos(nanos: i64) -> Self {
        let (seconds, nanos) = split_timestamp_nanos(nanos);
        Self { seconds, nanos }
    }

    /// Builds a timestamp, carrying excess or negative `nanos` into `seconds`.
    pub const fn new(seconds: i64, nanos: i64) -> Self {
        let carry = nanos.div_euclid(NANOS_PER_SEC);
        Self {
            seconds: seconds + carry,
            nanos: nanos.rem_euclid(NANOS_PER_SEC) as i32,
        }
    }

    /// Seconds since 1970-01-01T00:00:00Z, negative before the epoch.
    pub const fn seconds(&self) -> i64 {
        self.seconds
    }

    /// Nanoseconds past [`seconds`](Self::seconds).
    pub const fn nanos(&self) -> i32 {
        self.nanos
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Timestamp::new(after.as_secs() as i64, i64::from(after.subsec_nanos())),
            Err(err) => {
                let before = err.duration();
                Timestamp::new(
                    -(before.as_secs() as i64),
                    -i64::from(before.subsec_nanos()),
                )
            }
        }
    }
}

/// Splits nanoseconds since the epoch into floored seconds and a remainder in
/// `0..1e9`, the shape `google.protobuf.Timestamp` requires.
pub const fn split_timestamp_nanos(nanos: i64) -> (i64, i32) {
    (
        nanos.div_euclid(NANOS_PER_SEC),
        nanos.rem_euclid(NANOS_PER_SEC) as i32,
    )
}

/// Splits a signed nanosecond count into seconds and nanos that share its
/// sign, the shape `google.protobuf.Duration` requires.
pub const fn split_duration_nanos(nanos: i64) -> (i64, i32) {
    let seconds = nanos / NANOS_PER_SEC;
    (seconds, (nanos - seconds * NANOS_PER_SEC) as i32)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WellKnown {
    Timestamp,
    Duration,
}

impl WellKnown {
    pub(crate) fn proto_name(self) -> &'static str {
        match self {
            WellKnown::Timestamp => "google.protobuf.Timestamp",
            WellKnown::Duration => "google.protobuf.Duration",
        }
    }

    pub(crate) fn import_path(self) -> &'static str {
        match self {
            WellKnown::Timestamp => "google/protobuf/timestamp.proto",
            WellKnown::Duration => "google/protobuf/duration.proto",
        }
    }
}

/// Appends the two-field body shared by both well-known types. Negative
/// values are written as ten-byte varints, as proto3 `int64` and `int32` are.
pub fn encode_seconds_nanos(buf: &mut Vec<u8>, seconds: i64, nanos: i32) {
    if seconds != 0 {
        TagCode::new(1, WireType::Varint).write(buf);
        encode_varint(buf, seconds as u64);
    }
    if nanos != 0 {
        TagCode::new(2, WireType::Varint).write(buf);
        encode_varint(buf, i64::from(nanos) as u64);
    }
}

/// Appends a `google.protobuf.Timestamp` body for a Unix nanosecond
/// timestamp without building a [`Timestamp`] first.
pub fn encode_nsec_timestamp(buf: &mut Vec<u8>, unix_nanos: i64) {
    let (seconds, nanos) = split_timestamp_nanos(unix_nanos);
    encode_seconds_nanos(buf, seconds, nanos);
}

pub(crate) fn encode_timestamp(buf: &mut Vec<u8>, ts: &Timestamp) {
    encode_seconds_nanos(buf, ts.seconds, ts.nanos);
}

pub(crate) fn encode_duration(
    buf: &mut Vec<u8>,
    d: &core::time::Duration,
) -> Result<(), EncodeError> {
    let seconds = d.as_secs();
    if seconds > MAX_DURATION_SECS {
        return Err(EncodeError::DurationOutOfRange { seconds });
    }
    encode_seconds_nanos(buf, seconds as i64, d.subsec_nanos() as i32);
    Ok(())
}
