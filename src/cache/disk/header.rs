//! Header record codec
//!
//! On-disk layout of a `.header` file, all integers big-endian:
//!
//! ```text
//! 0    format            u32
//! 4    status            u16
//! 6    flags             u16   bit 0 has_body, bit 1 header_only
//! 8    name_len          u32
//! 12   key_len           u32
//! 16   entity_version    u64
//! 24   date              i64   microseconds since the Unix epoch
//! 32   expire            i64   i64::MIN when unknown
//! 40   request_time      i64
//! 48   response_time     i64
//! 56   identity kind     u32
//! 60   identity a        u64
//! 68   identity b        u64
//! 76   body_len          u64
//! 84   control flags     u32
//! 88   max-age           u64   seconds, u64::MAX when absent
//! 96   s-maxage          u64
//! 104  stale-while-rev.  u64
//! 112  stale-if-error    u64
//! 120  name bytes, key bytes, response header table, request header table
//! ```
//!
//! A header table is a `u32` count followed by that many
//! (`u32` length, name bytes, `u32` length, value bytes) pairs, in
//! insertion order and with repeats kept.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::error::DecodeError;
use super::types::BodyIdentity;
use crate::cache::CacheControl;
use crate::constants::DISK_FORMAT_VERSION;

/// Size of the fixed metadata block preceding the variable part
pub const FIXED_LEN: usize = 120;

const FLAG_HAS_BODY: u16 = 1 << 0;
const FLAG_HEADER_ONLY: u16 = 1 << 1;

const NO_EXPIRE: i64 = i64::MIN;
const NO_DURATION: u64 = u64::MAX;

/// Metadata stored in front of every cached response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub format: u32,
    pub status: StatusCode,
    /// Generation counter, bumped on every full replacement of the key
    pub entity_version: u64,
    pub date: SystemTime,
    pub expire: Option<SystemTime>,
    pub request_time: SystemTime,
    pub response_time: SystemTime,
    /// Identity of the data file this record was committed with
    pub identity: BodyIdentity,
    /// Length of the data file this record was committed with
    pub body_len: u64,
    pub has_body: bool,
    pub header_only: bool,
    pub control: CacheControl,
}

/// A fully decoded `.header` file
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedHeader {
    pub record: HeaderRecord,
    /// Canonical name, for humans and for collision checks
    pub name: String,
    /// Exact on-disk key, for collision checks
    pub key: String,
    pub headers_out: HeaderMap,
    pub headers_in: HeaderMap,
}

/// Encode a record, its identity strings and both header tables
pub fn encode(
    record: &HeaderRecord,
    name: &str,
    key: &str,
    headers_out: &HeaderMap,
    headers_in: &HeaderMap,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(FIXED_LEN + name.len() + key.len() + 512);

    let mut flags = 0u16;
    if record.has_body {
        flags |= FLAG_HAS_BODY;
    }
    if record.header_only {
        flags |= FLAG_HEADER_ONLY;
    }

    buf.put_u32(record.format);
    buf.put_u16(record.status.as_u16());
    buf.put_u16(flags);
    buf.put_u32(name.len() as u32);
    buf.put_u32(key.len() as u32);
    buf.put_u64(record.entity_version);
    buf.put_i64(to_micros(record.date));
    buf.put_i64(record.expire.map(to_micros).unwrap_or(NO_EXPIRE));
    buf.put_i64(to_micros(record.request_time));
    buf.put_i64(to_micros(record.response_time));

    let (kind, a, b) = record.identity.to_parts();
    buf.put_u32(kind);
    buf.put_u64(a);
    buf.put_u64(b);
    buf.put_u64(record.body_len);

    let control = &record.control;
    buf.put_u32(control.flag_bits());
    for duration in [
        control.max_age,
        control.s_maxage,
        control.stale_while_revalidate,
        control.stale_if_error,
    ] {
        buf.put_u64(duration.map(|d| d.as_secs()).unwrap_or(NO_DURATION));
    }
    debug_assert_eq!(buf.len(), FIXED_LEN);

    buf.put_slice(name.as_bytes());
    buf.put_slice(key.as_bytes());
    put_table(&mut buf, headers_out);
    put_table(&mut buf, headers_in);

    buf.freeze()
}

/// Read only the format field; `None` if the input is shorter than it
pub fn peek_format(bytes: &[u8]) -> Option<u32> {
    let mut buf = bytes;
    (buf.remaining() >= 4).then(|| buf.get_u32())
}

/// Decode a `.header` file.
///
/// The format field is checked before anything else is looked at.
pub fn decode(bytes: &[u8]) -> Result<DecodedHeader, DecodeError> {
    let mut buf = bytes;

    let format = get_u32(&mut buf)?;
    if format != DISK_FORMAT_VERSION {
        return Err(DecodeError::FormatMismatch {
            found: format,
            expected: DISK_FORMAT_VERSION,
        });
    }
    if bytes.len() < FIXED_LEN {
        return Err(DecodeError::Truncated);
    }

    let raw_status = buf.get_u16();
    let status =
        StatusCode::from_u16(raw_status).map_err(|_| DecodeError::InvalidStatus(raw_status))?;
    let flags = buf.get_u16();
    let name_len = buf.get_u32() as usize;
    let key_len = buf.get_u32() as usize;
    let entity_version = buf.get_u64();
    let date = from_micros(buf.get_i64());
    let expire = match buf.get_i64() {
        NO_EXPIRE => None,
        micros => Some(from_micros(micros)),
    };
    let request_time = from_micros(buf.get_i64());
    let response_time = from_micros(buf.get_i64());

    let kind = buf.get_u32();
    let a = buf.get_u64();
    let b = buf.get_u64();
    let identity = BodyIdentity::from_parts(kind, a, b)?;
    let body_len = buf.get_u64();

    let control_bits = buf.get_u32();
    let mut durations = [None; 4];
    for slot in durations.iter_mut() {
        *slot = match buf.get_u64() {
            NO_DURATION => None,
            secs => Some(Duration::from_secs(secs)),
        };
    }
    let control = CacheControl::from_parts(
        control_bits,
        durations[0],
        durations[1],
        durations[2],
        durations[3],
    );

    let name = get_str(&mut buf, name_len, "name")?;
    let key = get_str(&mut buf, key_len, "key")?;
    let headers_out = get_table(&mut buf)?;
    let headers_in = get_table(&mut buf)?;

    Ok(DecodedHeader {
        record: HeaderRecord {
            format,
            status,
            entity_version,
            date,
            expire,
            request_time,
            response_time,
            identity,
            body_len,
            has_body: flags & FLAG_HAS_BODY != 0,
            header_only: flags & FLAG_HEADER_ONLY != 0,
            control,
        },
        name,
        key,
        headers_out,
        headers_in,
    })
}

pub(crate) fn to_micros(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_micros()).unwrap_or(i64::MAX),
        // i64::MIN is reserved for "no expiry"
        Err(before) => i64::try_from(before.duration().as_micros())
            .map(|m| -m)
            .unwrap_or(i64::MIN + 1)
            .max(i64::MIN + 1),
    }
}

pub(crate) fn from_micros(micros: i64) -> SystemTime {
    if micros >= 0 {
        UNIX_EPOCH + Duration::from_micros(micros as u64)
    } else {
        UNIX_EPOCH - Duration::from_micros(micros.unsigned_abs())
    }
}

pub(crate) fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

pub(crate) fn get_u32(buf: &mut &[u8]) -> Result<u32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u32())
}

pub(crate) fn get_slice<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::Truncated);
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

pub(crate) fn get_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let len = get_u32(buf)? as usize;
    get_slice(buf, len)
}

pub(crate) fn get_str(
    buf: &mut &[u8],
    len: usize,
    what: &'static str,
) -> Result<String, DecodeError> {
    let raw = get_slice(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(what))
}

fn put_table(buf: &mut BytesMut, headers: &HeaderMap) {
    buf.put_u32(headers.len() as u32);
    for (name, value) in headers.iter() {
        put_bytes(buf, name.as_str().as_bytes());
        put_bytes(buf, value.as_bytes());
    }
}

fn get_table(buf: &mut &[u8]) -> Result<HeaderMap, DecodeError> {
    let count = get_u32(buf)? as usize;
    let mut headers = HeaderMap::new();
    for _ in 0..count {
        let name =
            HeaderName::from_bytes(get_bytes(buf)?).map_err(|_| DecodeError::InvalidHeader)?;
        let value =
            HeaderValue::from_bytes(get_bytes(buf)?).map_err(|_| DecodeError::InvalidHeader)?;
        headers.append(name, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{CACHE_CONTROL, CONTENT_TYPE, SET_COOKIE, VARY};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn sample_record() -> HeaderRecord {
        HeaderRecord {
            format: DISK_FORMAT_VERSION,
            status: StatusCode::OK,
            entity_version: 7,
            date: at(1_700_000_000),
            expire: Some(at(1_700_003_600)),
            request_time: at(1_699_999_999),
            response_time: at(1_700_000_000),
            identity: BodyIdentity::Inode {
                device: 2049,
                inode: 123456,
            },
            body_len: 2,
            has_body: true,
            header_only: false,
            control: CacheControl::parse("public, max-age=3600"),
        }
    }

    fn sample_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.append(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        headers.append(CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
        headers
    }

    #[test]
    fn test_decode_returns_what_was_encoded() {
        let record = sample_record();
        let headers_out = sample_headers();
        let mut headers_in = HeaderMap::new();
        headers_in.append(VARY, HeaderValue::from_static("x"));

        let bytes = encode(&record, "http://example.com/a", "http://example.com/a", &headers_out, &headers_in);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.record, record);
        assert_eq!(decoded.name, "http://example.com/a");
        assert_eq!(decoded.key, "http://example.com/a");
        assert_eq!(decoded.headers_out, headers_out);
        assert_eq!(decoded.headers_in, headers_in);
    }

    #[test]
    fn test_repeated_headers_keep_their_order() {
        // Test: Set-Cookie values come back in the order they were stored
        let bytes = encode(&sample_record(), "n", "n", &sample_headers(), &HeaderMap::new());
        let decoded = decode(&bytes).unwrap();

        let cookies: Vec<_> = decoded
            .headers_out
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_fixed_block_layout_is_big_endian() {
        let bytes = encode(&sample_record(), "abc", "abcd", &HeaderMap::new(), &HeaderMap::new());

        assert_eq!(&bytes[0..4], &DISK_FORMAT_VERSION.to_be_bytes());
        assert_eq!(&bytes[4..6], &200u16.to_be_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &4u32.to_be_bytes());
        assert_eq!(&bytes[16..24], &7u64.to_be_bytes());
        assert_eq!(&bytes[FIXED_LEN..FIXED_LEN + 3], b"abc");
        // name + key + two empty tables
        assert_eq!(bytes.len(), FIXED_LEN + 3 + 4 + 4 + 4);
    }

    #[test]
    fn test_format_mismatch_checked_before_anything_else() {
        // Test: Only the version field is read from a foreign layout
        let mut bytes = BytesMut::new();
        bytes.put_u32(DISK_FORMAT_VERSION + 1);
        bytes.put_slice(b"garbage that is not a record");

        assert_eq!(
            decode(&bytes),
            Err(DecodeError::FormatMismatch {
                found: DISK_FORMAT_VERSION + 1,
                expected: DISK_FORMAT_VERSION,
            })
        );
        assert_eq!(peek_format(&bytes), Some(DISK_FORMAT_VERSION + 1));
    }

    #[test]
    fn test_truncated_input_is_an_error_not_a_panic() {
        let bytes = encode(&sample_record(), "name", "key", &sample_headers(), &HeaderMap::new());
        for len in [0, 3, 4, 60, FIXED_LEN, FIXED_LEN + 5, bytes.len() - 1] {
            let result = decode(&bytes[..len]);
            assert!(result.is_err(), "length {} decoded", len);
            if len >= 4 {
                assert_eq!(result, Err(DecodeError::Truncated));
            }
        }
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let mut bytes = BytesMut::from(&encode(&sample_record(), "n", "n", &HeaderMap::new(), &HeaderMap::new())[..]);
        bytes[4..6].copy_from_slice(&5u16.to_be_bytes());
        assert_eq!(decode(&bytes), Err(DecodeError::InvalidStatus(5)));
    }

    #[test]
    fn test_absent_expire_and_directives_survive() {
        let record = HeaderRecord {
            expire: None,
            control: CacheControl::default(),
            identity: BodyIdentity::None,
            has_body: false,
            header_only: true,
            body_len: 0,
            ..sample_record()
        };
        let bytes = encode(&record, "n", "n", &HeaderMap::new(), &HeaderMap::new());
        assert_eq!(decode(&bytes).unwrap().record, record);
    }

    #[test]
    fn test_micros_conversion_handles_pre_epoch_times() {
        let before = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(to_micros(before), -10_000_000);
        assert_eq!(from_micros(to_micros(before)), before);
        assert_ne!(to_micros(before), NO_EXPIRE);
    }
}
