//! PostgreSQL type registry
//!
//! Maps PG type OIDs to host values and back. Result values cross the wire
//! in text format unless the client asked for binary in Bind; parameters
//! arrive in either format and are decoded into [`PgValue`] host values
//! before they reach the executor.

pub mod vector;

use crate::error::{AdapterError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

/// PostgreSQL type OIDs understood by the adapter.
pub mod oid {
    /// boolean
    pub const BOOL: i32 = 16;
    /// bytea
    pub const BYTEA: i32 = 17;
    /// bigint
    pub const INT8: i32 = 20;
    /// smallint
    pub const INT2: i32 = 21;
    /// integer
    pub const INT4: i32 = 23;
    /// text
    pub const TEXT: i32 = 25;
    /// oid
    pub const OID: i32 = 26;
    /// json
    pub const JSON: i32 = 114;
    /// real
    pub const FLOAT4: i32 = 700;
    /// double precision
    pub const FLOAT8: i32 = 701;
    /// unknown; reported for undeclared parameter types
    pub const UNKNOWN: i32 = 705;
    /// varchar
    pub const VARCHAR: i32 = 1043;
    /// date
    pub const DATE: i32 = 1082;
    /// time
    pub const TIME: i32 = 1083;
    /// timestamp without time zone
    pub const TIMESTAMP: i32 = 1114;
    /// timestamp with time zone
    pub const TIMESTAMPTZ: i32 = 1184;
    /// interval
    pub const INTERVAL: i32 = 1186;
    /// numeric
    pub const NUMERIC: i32 = 1700;
    /// uuid
    pub const UUID: i32 = 2950;
    /// jsonb
    pub const JSONB: i32 = 3802;
    /// vector pseudo-type. 16388 sits just past the user-OID floor (16384)
    /// and collides with nothing drivers special-case.
    pub const VECTOR: i32 = 16388;

    /// 1-D array element OIDs accepted for vector parameters.
    pub const FLOAT4_ARRAY: i32 = 1021;
    /// float8[]
    pub const FLOAT8_ARRAY: i32 = 1022;
    /// int4[]
    pub const INT4_ARRAY: i32 = 1007;
    /// int8[]
    pub const INT8_ARRAY: i32 = 1016;
}

/// PostgreSQL binary date and timestamp payloads count from 2000-01-01.
const PG_EPOCH_DATE: (i32, u32, u32) = (2000, 1, 1);

/// A decoded host value.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    /// SQL NULL
    Null,
    /// boolean
    Bool(bool),
    /// any integer width
    Int(i64),
    /// any float width
    Float(f64),
    /// character data, also the fallback for types kept textual
    Text(String),
    /// raw bytes
    Bytes(Vec<u8>),
    /// vector literal, element order preserved
    Vector(Vec<f64>),
}

impl PgValue {
    /// True when the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }
}

/// Infer a column OID from the first non-null value seen in that column.
/// Used when the backend reports no column metadata.
pub fn infer_oid(value: &PgValue) -> i32 {
    match value {
        PgValue::Null => oid::TEXT,
        PgValue::Bool(_) => oid::BOOL,
        PgValue::Int(_) => oid::INT4,
        PgValue::Float(_) => oid::FLOAT8,
        PgValue::Bytes(_) => oid::BYTEA,
        PgValue::Text(_) => oid::TEXT,
        PgValue::Vector(_) => oid::VECTOR,
    }
}

/// Declared size in bytes for fixed-width types, -1 for variable width.
pub fn type_size(type_oid: i32) -> i16 {
    match type_oid {
        oid::BOOL => 1,
        oid::INT2 => 2,
        oid::INT4 | oid::OID | oid::FLOAT4 | oid::DATE => 4,
        oid::INT8 | oid::FLOAT8 | oid::TIME | oid::TIMESTAMP | oid::TIMESTAMPTZ => 8,
        oid::UUID => 16,
        oid::INTERVAL => 16,
        _ => -1,
    }
}

/// Human-readable type name for error messages.
pub fn type_name(type_oid: i32) -> &'static str {
    match type_oid {
        oid::BOOL => "boolean",
        oid::BYTEA => "bytea",
        oid::INT2 => "smallint",
        oid::INT4 => "integer",
        oid::INT8 => "bigint",
        oid::TEXT => "text",
        oid::OID => "oid",
        oid::JSON => "json",
        oid::JSONB => "jsonb",
        oid::FLOAT4 => "real",
        oid::FLOAT8 => "double precision",
        oid::VARCHAR => "character varying",
        oid::DATE => "date",
        oid::TIME => "time",
        oid::TIMESTAMP => "timestamp",
        oid::TIMESTAMPTZ => "timestamp with time zone",
        oid::INTERVAL => "interval",
        oid::NUMERIC => "numeric",
        oid::UUID => "uuid",
        oid::VECTOR => "vector",
        oid::UNKNOWN => "unknown",
        _ => "?",
    }
}

/// Encode a host value in text format. NULL encodes as None (wire length -1).
pub fn encode_text(value: &PgValue) -> Option<Bytes> {
    match value {
        PgValue::Null => None,
        PgValue::Bool(true) => Some(Bytes::from_static(b"t")),
        PgValue::Bool(false) => Some(Bytes::from_static(b"f")),
        PgValue::Int(v) => Some(Bytes::from(v.to_string())),
        PgValue::Float(v) => Some(Bytes::from(format_float(*v))),
        PgValue::Text(v) => Some(Bytes::copy_from_slice(v.as_bytes())),
        PgValue::Bytes(v) => {
            let mut out = String::with_capacity(2 + v.len() * 2);
            out.push_str("\\x");
            out.push_str(&hex::encode(v));
            Some(Bytes::from(out))
        }
        PgValue::Vector(v) => Some(Bytes::from(vector::format_vector_text(v))),
    }
}

/// Encode a host value for the requested format code against the column's
/// declared OID. Binary support covers the fixed-width scalar types plus
/// text-ish and vector columns; anything else in binary format is refused.
pub fn encode_value(value: &PgValue, type_oid: i32, format: i16) -> Result<Option<Bytes>> {
    if format == 0 {
        return Ok(encode_text(value));
    }

    let value = match value {
        PgValue::Null => return Ok(None),
        other => other,
    };

    let mut buf = BytesMut::new();
    match (type_oid, value) {
        (oid::BOOL, PgValue::Bool(v)) => buf.put_u8(*v as u8),
        (oid::INT2, PgValue::Int(v)) => buf.put_i16(*v as i16),
        (oid::INT4 | oid::OID, PgValue::Int(v)) => buf.put_i32(*v as i32),
        (oid::INT8, PgValue::Int(v)) => buf.put_i64(*v),
        (oid::FLOAT4, PgValue::Float(v)) => buf.put_f32(*v as f32),
        (oid::FLOAT8, PgValue::Float(v)) => buf.put_f64(*v),
        (oid::FLOAT8, PgValue::Int(v)) => buf.put_f64(*v as f64),
        (oid::BYTEA, PgValue::Bytes(v)) => buf.put_slice(v),
        (oid::TEXT | oid::VARCHAR | oid::JSON | oid::UNKNOWN, PgValue::Text(v)) => {
            buf.put_slice(v.as_bytes())
        }
        (oid::VECTOR, PgValue::Vector(v)) => {
            return Ok(Some(vector::encode_vector_binary(v)));
        }
        _ => {
            return Err(AdapterError::Unsupported(format!(
                "binary result format for type {}",
                type_name(type_oid)
            )))
        }
    }
    Ok(Some(buf.freeze()))
}

/// Decode one Bind parameter into a host value.
pub fn decode_parameter(raw: Option<&Bytes>, type_oid: i32, format: i16) -> Result<PgValue> {
    let Some(raw) = raw else {
        return Ok(PgValue::Null);
    };
    if format == 0 {
        decode_text_parameter(raw, type_oid)
    } else {
        decode_binary_parameter(raw, type_oid)
    }
}

fn decode_text_parameter(raw: &Bytes, type_oid: i32) -> Result<PgValue> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| AdapterError::InvalidText("parameter is not valid UTF-8".to_string()))?;

    let value = match type_oid {
        oid::BOOL => match text {
            "t" | "true" | "TRUE" | "on" | "1" => PgValue::Bool(true),
            "f" | "false" | "FALSE" | "off" | "0" => PgValue::Bool(false),
            other => {
                return Err(AdapterError::InvalidText(format!(
                    "invalid boolean: \"{}\"",
                    other
                )))
            }
        },
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => PgValue::Int(
            text.trim()
                .parse::<i64>()
                .map_err(|_| AdapterError::InvalidText(format!("invalid integer: \"{}\"", text)))?,
        ),
        oid::FLOAT4 | oid::FLOAT8 | oid::NUMERIC => PgValue::Float(
            text.trim()
                .parse::<f64>()
                .map_err(|_| AdapterError::InvalidText(format!("invalid number: \"{}\"", text)))?,
        ),
        oid::BYTEA => {
            let hex_part = text
                .strip_prefix("\\x")
                .ok_or_else(|| AdapterError::InvalidText("bytea must use hex format".to_string()))?;
            PgValue::Bytes(
                hex::decode(hex_part)
                    .map_err(|_| AdapterError::InvalidText("invalid bytea hex".to_string()))?,
            )
        }
        oid::VECTOR => PgValue::Vector(vector::parse_vector_text(text)?),
        // Dates, times, uuids, json and everything undeclared travel as text;
        // the translator and the backend agree on their literal forms.
        _ => PgValue::Text(text.to_string()),
    };
    Ok(value)
}

fn decode_binary_parameter(raw: &Bytes, type_oid: i32) -> Result<PgValue> {
    let mut buf = &raw[..];

    let expect = |n: usize, what: &str| -> Result<()> {
        if raw.len() != n {
            Err(AdapterError::InvalidText(format!(
                "invalid binary length {} for {}",
                raw.len(),
                what
            )))
        } else {
            Ok(())
        }
    };

    let value = match type_oid {
        oid::BOOL => {
            expect(1, "boolean")?;
            PgValue::Bool(buf.get_u8() != 0)
        }
        oid::INT2 => {
            expect(2, "smallint")?;
            PgValue::Int(buf.get_i16() as i64)
        }
        oid::INT4 | oid::OID => {
            expect(4, "integer")?;
            PgValue::Int(buf.get_i32() as i64)
        }
        oid::INT8 => {
            expect(8, "bigint")?;
            PgValue::Int(buf.get_i64())
        }
        oid::FLOAT4 => {
            expect(4, "real")?;
            PgValue::Float(buf.get_f32() as f64)
        }
        oid::FLOAT8 => {
            expect(8, "double precision")?;
            PgValue::Float(buf.get_f64())
        }
        oid::BYTEA => PgValue::Bytes(raw.to_vec()),
        oid::TEXT | oid::VARCHAR | oid::JSON | oid::JSONB => PgValue::Text(
            std::str::from_utf8(raw)
                .map_err(|_| AdapterError::InvalidText("parameter is not valid UTF-8".to_string()))?
                .to_string(),
        ),
        // Undeclared type in binary format: pgvector clients ship their
        // query vector as a plain 1-D array without declaring an OID, so
        // try the array shape first, then text, then raw bytes.
        oid::UNKNOWN => {
            if let Ok(values) = vector::decode_array_binary(raw) {
                PgValue::Vector(values)
            } else if let Ok(text) = std::str::from_utf8(raw) {
                PgValue::Text(text.to_string())
            } else {
                PgValue::Bytes(raw.to_vec())
            }
        }
        oid::UUID => {
            expect(16, "uuid")?;
            PgValue::Text(format_uuid(raw))
        }
        oid::DATE => {
            expect(4, "date")?;
            let days = buf.get_i32();
            PgValue::Text(binary_date_to_text(days)?)
        }
        oid::TIMESTAMP | oid::TIMESTAMPTZ => {
            expect(8, "timestamp")?;
            let micros = buf.get_i64();
            PgValue::Text(binary_timestamp_to_text(micros)?)
        }
        oid::VECTOR
        | oid::FLOAT4_ARRAY
        | oid::FLOAT8_ARRAY
        | oid::INT4_ARRAY
        | oid::INT8_ARRAY => PgValue::Vector(vector::decode_array_binary(raw)?),
        other => {
            return Err(AdapterError::Unsupported(format!(
                "binary parameter format for type OID {}",
                other
            )))
        }
    };
    Ok(value)
}

/// IRIS reports NULL result fields as an empty string, and occasionally as a
/// reflective object-reference token ("12@%SQL.StatementResult"). Both are
/// normalized to NULL here, which conflates NULL with a genuinely empty
/// string; the trade-off is accepted for driver compatibility.
pub fn normalize_iris_null(value: PgValue) -> PgValue {
    match value {
        PgValue::Text(s) if s.is_empty() => PgValue::Null,
        PgValue::Text(s) if is_object_ref(&s) => PgValue::Null,
        other => other,
    }
}

fn is_object_ref(s: &str) -> bool {
    match s.split_once('@') {
        Some((id, class)) => {
            !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) && class.starts_with('%')
        }
        None => false,
    }
}

/// Float text form, matching PostgreSQL's shortest-roundtrip output closely
/// enough for clients (no exponent below 1e15, NaN/Infinity spelled out).
fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        v.to_string()
    }
}

fn format_uuid(raw: &[u8]) -> String {
    let h = hex::encode(raw);
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(PG_EPOCH_DATE.0, PG_EPOCH_DATE.1, PG_EPOCH_DATE.2)
        .expect("valid epoch")
}

fn binary_date_to_text(days: i32) -> Result<String> {
    let date = pg_epoch_date()
        .checked_add_signed(chrono::Duration::days(days as i64))
        .ok_or_else(|| AdapterError::InvalidText("date out of range".to_string()))?;
    Ok(format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month(),
        date.day()
    ))
}

fn binary_timestamp_to_text(micros: i64) -> Result<String> {
    let epoch = pg_epoch_date().and_hms_opt(0, 0, 0).expect("valid epoch");
    let ts: NaiveDateTime = epoch
        .checked_add_signed(chrono::Duration::microseconds(micros))
        .ok_or_else(|| AdapterError::InvalidText("timestamp out of range".to_string()))?;
    let mut out = format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    );
    let micros_part = ts.and_utc().timestamp_subsec_micros();
    if micros_part != 0 {
        out.push_str(&format!(".{:06}", micros_part));
        while out.ends_with('0') {
            out.pop();
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_infer_oid_from_values() {
        assert_eq!(infer_oid(&PgValue::Bool(true)), oid::BOOL);
        assert_eq!(infer_oid(&PgValue::Int(1)), oid::INT4);
        assert_eq!(infer_oid(&PgValue::Float(1.5)), oid::FLOAT8);
        assert_eq!(infer_oid(&PgValue::Bytes(vec![1])), oid::BYTEA);
        assert_eq!(infer_oid(&PgValue::Text("x".to_string())), oid::TEXT);
        assert_eq!(infer_oid(&PgValue::Null), oid::TEXT);
    }

    #[rstest]
    #[case(PgValue::Bool(true), "t")]
    #[case(PgValue::Bool(false), "f")]
    #[case(PgValue::Int(-42), "-42")]
    #[case(PgValue::Float(1.5), "1.5")]
    #[case(PgValue::Text("héllo".to_string()), "héllo")]
    fn test_encode_text(#[case] value: PgValue, #[case] expected: &str) {
        assert_eq!(encode_text(&value).unwrap(), Bytes::from(expected.to_string()));
    }

    #[test]
    fn test_null_encodes_as_none() {
        assert_eq!(encode_text(&PgValue::Null), None);
        assert_eq!(encode_value(&PgValue::Null, oid::INT4, 1).unwrap(), None);
    }

    #[test]
    fn test_bytea_text_round_trip() {
        let original = PgValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let encoded = encode_text(&original).unwrap();
        assert_eq!(&encoded[..], b"\\xdeadbeef");
        let decoded = decode_parameter(Some(&encoded), oid::BYTEA, 0).unwrap();
        assert_eq!(decoded, original);
    }

    #[rstest]
    #[case(PgValue::Bool(true), oid::BOOL)]
    #[case(PgValue::Int(7), oid::INT2)]
    #[case(PgValue::Int(-123456), oid::INT4)]
    #[case(PgValue::Int(1 << 40), oid::INT8)]
    #[case(PgValue::Float(2.25), oid::FLOAT8)]
    #[case(PgValue::Text("abc".to_string()), oid::TEXT)]
    fn test_binary_round_trip(#[case] value: PgValue, #[case] type_oid: i32) {
        let encoded = encode_value(&value, type_oid, 1).unwrap().unwrap();
        let decoded = decode_parameter(Some(&encoded), type_oid, 1).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_text_round_trip_all_scalars() {
        for value in [
            PgValue::Bool(false),
            PgValue::Int(0),
            PgValue::Int(i64::MAX),
            PgValue::Float(-0.125),
            PgValue::Text("snowman ☃".to_string()),
            PgValue::Bytes(vec![0, 1, 2]),
        ] {
            let type_oid = infer_oid(&value);
            let encoded = encode_text(&value).unwrap();
            let decoded = decode_parameter(Some(&encoded), type_oid, 0).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_decode_binary_uuid() {
        let raw = Bytes::from_static(&[
            0x55, 0x0e, 0x84, 0x00, 0xe2, 0x9b, 0x41, 0xd4, 0xa7, 0x16, 0x44, 0x66, 0x55, 0x44,
            0x00, 0x00,
        ]);
        let decoded = decode_parameter(Some(&raw), oid::UUID, 1).unwrap();
        assert_eq!(
            decoded,
            PgValue::Text("550e8400-e29b-41d4-a716-446655440000".to_string())
        );
    }

    #[test]
    fn test_decode_binary_date_and_timestamp() {
        // 2000-01-02 is one day past the PG binary epoch
        let raw = Bytes::copy_from_slice(&1i32.to_be_bytes());
        assert_eq!(
            decode_parameter(Some(&raw), oid::DATE, 1).unwrap(),
            PgValue::Text("2000-01-02".to_string())
        );

        // 86_400_000_000 micros = 1 day
        let raw = Bytes::copy_from_slice(&86_400_000_000i64.to_be_bytes());
        assert_eq!(
            decode_parameter(Some(&raw), oid::TIMESTAMP, 1).unwrap(),
            PgValue::Text("2000-01-02 00:00:00".to_string())
        );
    }

    #[test]
    fn test_invalid_text_parameter() {
        let raw = Bytes::from_static(b"not-a-number");
        assert!(matches!(
            decode_parameter(Some(&raw), oid::INT4, 0),
            Err(AdapterError::InvalidText(_))
        ));
        assert!(matches!(
            decode_parameter(Some(&raw), oid::BOOL, 0),
            Err(AdapterError::InvalidText(_))
        ));
    }

    #[test]
    fn test_normalize_iris_null() {
        assert_eq!(
            normalize_iris_null(PgValue::Text(String::new())),
            PgValue::Null
        );
        assert_eq!(
            normalize_iris_null(PgValue::Text("3@%SQL.StatementResult".to_string())),
            PgValue::Null
        );
        assert_eq!(
            normalize_iris_null(PgValue::Text("user@example.com".to_string())),
            PgValue::Text("user@example.com".to_string())
        );
        assert_eq!(normalize_iris_null(PgValue::Int(0)), PgValue::Int(0));
    }

    #[test]
    fn test_float_special_values() {
        assert_eq!(&encode_text(&PgValue::Float(f64::NAN)).unwrap()[..], b"NaN");
        assert_eq!(
            &encode_text(&PgValue::Float(f64::INFINITY)).unwrap()[..],
            b"Infinity"
        );
    }
}
