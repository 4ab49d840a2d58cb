// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Text encoding of cached values.
//!
//! Values are stored as JSON. Two shapes exist in the store:
//!
//! - a plain value, or the [`NULL_MARKER`] meaning "confirmed absent upstream", written with a
//!   physical TTL by the pass-through and mutex strategies;
//! - an [`Envelope`] `{"expireTime": ..., "data": ...}` written without a physical TTL by the
//!   logical-expiration strategy and by warm-up.
//!
//! ```
//! use std::time::{Duration, SystemTime};
//!
//! use herdguard::codec::{self, Cached, Envelope};
//!
//! let raw = codec::encode(&vec![1, 2, 3])?;
//! assert!(matches!(codec::decode_entry::<Vec<i32>>(Some(&raw))?, Cached::Value(v) if v == [1, 2, 3]));
//! assert!(matches!(codec::decode_entry::<Vec<i32>>(Some(""))?, Cached::NullMarker));
//!
//! let expire_time = SystemTime::UNIX_EPOCH + Duration::from_secs(30);
//! let raw = codec::encode_envelope(Some(&"shop"), expire_time)?;
//! let envelope: Envelope<String> = codec::decode_envelope(&raw)?;
//! assert_eq!(envelope.expire_time(), expire_time);
//! assert_eq!(envelope.data().map(String::as_str), Some("shop"));
//! # herdguard::Result::Ok(())
//! ```

use std::time::SystemTime;

use herdguard_tier::{Error, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Payload marking a key as absent in the backing store.
pub const NULL_MARKER: &str = "";

/// Returns true if `raw` is a null marker. Whitespace-only payloads count as blank.
#[must_use]
pub fn is_null_marker(raw: &str) -> bool {
    raw.trim().is_empty()
}

/// A decoded plain cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached<V> {
    /// A cached value.
    Value(V),
    /// The key is cached as absent upstream.
    NullMarker,
    /// Nothing is cached under the key.
    Missing,
}

/// Encodes `value` as JSON.
///
/// # Errors
///
/// Returns a codec error when `value` cannot be serialized.
pub fn encode<V: Serialize + ?Sized>(value: &V) -> Result<String> {
    serde_json::to_string(value).map_err(Error::codec)
}

/// Decodes a JSON payload into `V`.
///
/// # Errors
///
/// Returns a codec error when `raw` is not a valid encoding of `V`.
pub fn decode<V: DeserializeOwned>(raw: &str) -> Result<V> {
    serde_json::from_str(raw).map_err(Error::codec)
}

/// Classifies a raw store read as a value, a null marker, or a miss.
///
/// # Errors
///
/// Returns a codec error when a non-blank payload is not a valid encoding of `V`.
pub fn decode_entry<V: DeserializeOwned>(raw: Option<&str>) -> Result<Cached<V>> {
    match raw {
        None => Ok(Cached::Missing),
        Some(raw) if is_null_marker(raw) => Ok(Cached::NullMarker),
        Some(raw) => decode(raw).map(Cached::Value),
    }
}

/// A value paired with the instant after which it is considered stale.
///
/// On the wire `expireTime` is an RFC 3339 UTC timestamp with nanosecond precision. Readers also
/// accept epoch milliseconds and zone-less ISO-8601 timestamps, which are taken as UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    #[serde(with = "expire_time")]
    expire_time: SystemTime,
    data: Option<T>,
}

impl<T> Envelope<T> {
    /// Creates an envelope holding `data` that goes stale at `expire_time`.
    #[must_use]
    pub fn new(data: Option<T>, expire_time: SystemTime) -> Self {
        Self { expire_time, data }
    }

    /// Returns the instant the value goes stale.
    #[must_use]
    pub fn expire_time(&self) -> SystemTime {
        self.expire_time
    }

    /// Returns true while `now` is strictly before the expiry instant.
    #[must_use]
    pub fn is_fresh(&self, now: SystemTime) -> bool {
        now < self.expire_time
    }

    /// Returns the embedded value, `None` when the envelope records an absent value.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Consumes the envelope and returns the embedded value.
    #[must_use]
    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

/// Encodes an envelope holding `data` that goes stale at `expire_time`.
///
/// # Errors
///
/// Returns a codec error when `data` cannot be serialized.
pub fn encode_envelope<V: Serialize + ?Sized>(data: Option<&V>, expire_time: SystemTime) -> Result<String> {
    encode(&Envelope::new(data, expire_time))
}

/// Decodes an envelope.
///
/// # Errors
///
/// Returns a codec error when `raw` is not an envelope or its data is not a valid `V`.
pub fn decode_envelope<V: DeserializeOwned>(raw: &str) -> Result<Envelope<V>> {
    decode(raw)
}

mod expire_time {
    use std::{
        fmt,
        time::{Duration, SystemTime},
    };

    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{
        Deserializer, Serializer,
        de::{self, Visitor},
    };

    pub(super) fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let time: DateTime<Utc> = (*time).into();
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        deserializer.deserialize_any(ExpireTimeVisitor)
    }

    struct ExpireTimeVisitor;

    impl Visitor<'_> for ExpireTimeVisitor {
        type Value = SystemTime;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("an ISO-8601 timestamp or epoch milliseconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<SystemTime, E> {
            if let Ok(time) = DateTime::parse_from_rfc3339(value) {
                return Ok(time.with_timezone(&Utc).into());
            }
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|time| time.and_utc().into())
                .map_err(|error| E::custom(format_args!("invalid expireTime '{value}': {error}")))
        }

        fn visit_u64<E: de::Error>(self, millis: u64) -> Result<SystemTime, E> {
            SystemTime::UNIX_EPOCH
                .checked_add(Duration::from_millis(millis))
                .ok_or_else(|| E::custom("expireTime out of range"))
        }

        fn visit_i64<E: de::Error>(self, millis: i64) -> Result<SystemTime, E> {
            let offset = Duration::from_millis(millis.unsigned_abs());
            let time = if millis >= 0 {
                SystemTime::UNIX_EPOCH.checked_add(offset)
            } else {
                SystemTime::UNIX_EPOCH.checked_sub(offset)
            };
            time.ok_or_else(|| E::custom("expireTime out of range"))
        }
    }
}
