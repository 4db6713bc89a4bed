//! Vector pseudo-type encodings
//!
//! Text form is `[f1,f2,...]`. Binary form is the PostgreSQL 1-D array
//! encoding over float4/float8/int4/int8 elements, which is what pgvector
//! clients and plain array-typed drivers both produce. Decoded vectors end
//! up wrapped in an IRIS `TO_VECTOR(?, DOUBLE)` call by the translator.

use crate::error::{AdapterError, Result};
use crate::types::oid;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Parse the pgvector text literal `[1,2.5,3]`. Whitespace around elements
/// is tolerated; an empty vector `[]` is not (pgvector rejects it too).
pub fn parse_vector_text(text: &str) -> Result<Vec<f64>> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            AdapterError::InvalidText(format!("malformed vector literal: \"{}\"", text))
        })?;

    if inner.trim().is_empty() {
        return Err(AdapterError::InvalidText(
            "vector must have at least 1 dimension".to_string(),
        ));
    }

    inner
        .split(',')
        .map(|part| {
            part.trim().parse::<f64>().map_err(|_| {
                AdapterError::InvalidText(format!("invalid vector element: \"{}\"", part.trim()))
            })
        })
        .collect()
}

/// Format a vector as its text literal, no spaces.
pub fn format_vector_text(values: &[f64]) -> String {
    let mut out = String::with_capacity(2 + values.len() * 8);
    out.push('[');
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

/// Decode a PostgreSQL 1-D array binary payload into vector elements.
/// Accepts float4/float8/int4/int8 element OIDs; anything else, any other
/// dimensionality, and NULL elements are rejected.
pub fn decode_array_binary(raw: &Bytes) -> Result<Vec<f64>> {
    let mut buf = &raw[..];
    if buf.remaining() < 12 {
        return Err(AdapterError::InvalidText(
            "truncated array parameter".to_string(),
        ));
    }

    let ndim = buf.get_i32();
    let _has_nulls = buf.get_i32();
    let elem_oid = buf.get_i32();

    if ndim != 1 {
        return Err(AdapterError::InvalidText(format!(
            "vector parameter must be a 1-D array, got {} dimensions",
            ndim
        )));
    }

    let elem_width = match elem_oid {
        oid::INT4 | oid::FLOAT4 => 4,
        oid::INT8 | oid::FLOAT8 => 8,
        other => {
            return Err(AdapterError::InvalidText(format!(
                "unsupported vector element type OID {}",
                other
            )))
        }
    };

    if buf.remaining() < 8 {
        return Err(AdapterError::InvalidText(
            "truncated array parameter".to_string(),
        ));
    }
    let count = buf.get_i32();
    let _lower_bound = buf.get_i32();
    if count < 0 {
        return Err(AdapterError::InvalidText(
            "negative array length".to_string(),
        ));
    }

    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(AdapterError::InvalidText(
                "truncated array element".to_string(),
            ));
        }
        let len = buf.get_i32();
        if len == -1 {
            return Err(AdapterError::InvalidText(
                "vector elements may not be NULL".to_string(),
            ));
        }
        if len != elem_width || buf.remaining() < elem_width as usize {
            return Err(AdapterError::InvalidText(format!(
                "bad array element length {}",
                len
            )));
        }
        let value = match elem_oid {
            oid::INT4 => buf.get_i32() as f64,
            oid::INT8 => buf.get_i64() as f64,
            oid::FLOAT4 => buf.get_f32() as f64,
            _ => buf.get_f64(),
        };
        values.push(value);
    }

    if values.is_empty() {
        return Err(AdapterError::InvalidText(
            "vector must have at least 1 dimension".to_string(),
        ));
    }
    Ok(values)
}

/// Encode vector elements as a PostgreSQL float8 1-D array binary payload.
pub fn encode_vector_binary(values: &[f64]) -> Bytes {
    let mut buf = BytesMut::with_capacity(20 + values.len() * 12);
    buf.put_i32(1); // dimensions
    buf.put_i32(0); // no NULL bitmap
    buf.put_i32(oid::FLOAT8);
    buf.put_i32(values.len() as i32);
    buf.put_i32(1); // lower bound
    for v in values {
        buf.put_i32(8);
        buf.put_f64(*v);
    }
    buf.freeze()
}
