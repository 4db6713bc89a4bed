//! Frame reading and frontend message decoding
//!
//! The reader side of the wire codec: splits the byte stream into frames
//! (startup frames have no tag byte; everything after startup is tagged) and
//! decodes frontend message payloads into typed values.

use crate::error::{AdapterError, Result};
use crate::protocol::message::{
    FrontendMessage, StartupFrame, CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, PROTOCOL_VERSION_3,
    SSL_REQUEST_CODE,
};
use bytes::{Buf, Bytes, BytesMut};
use log::trace;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Hard cap on a single frame, including the length field.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;

/// Startup packets are tiny; anything bigger is garbage or an attack.
const MAX_STARTUP_BYTES: usize = 64 * 1024;

/// Reads length-prefixed protocol frames from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a stream with the default frame cap.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Override the frame cap.
    pub fn with_max_frame_bytes(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
        }
    }

    /// Read the first frame on a connection. Startup frames carry no tag
    /// byte; the protocol field distinguishes real startups from the
    /// SSLRequest / GSSENCRequest / CancelRequest sentinels.
    pub async fn read_startup(&mut self) -> Result<StartupFrame> {
        let length = self.reader.read_i32().await.map_err(map_eof)? as usize;
        if !(8..=MAX_STARTUP_BYTES).contains(&length) {
            return Err(AdapterError::Protocol(format!(
                "invalid startup packet length {}",
                length
            )));
        }

        let mut body = vec![0u8; length - 4];
        self.reader.read_exact(&mut body).await.map_err(map_eof)?;
        let mut body = Reader::new(&body);

        let code = body.i32()?;
        match code {
            SSL_REQUEST_CODE => Ok(StartupFrame::SslRequest),
            GSSENC_REQUEST_CODE => Ok(StartupFrame::GssEncRequest),
            CANCEL_REQUEST_CODE => {
                let process_id = body.i32()?;
                let secret_key = body.i32()?;
                Ok(StartupFrame::CancelRequest {
                    process_id,
                    secret_key,
                })
            }
            PROTOCOL_VERSION_3 => {
                let mut parameters = HashMap::new();
                loop {
                    let key = body.cstring()?;
                    if key.is_empty() {
                        break;
                    }
                    let value = body.cstring()?;
                    parameters.insert(key, value);
                }
                Ok(StartupFrame::Startup { parameters })
            }
            other => {
                let major = (other >> 16) & 0xFFFF;
                let minor = other & 0xFFFF;
                Err(AdapterError::Protocol(format!(
                    "unsupported protocol version {}.{}",
                    major, minor
                )))
            }
        }
    }

    /// Read one tagged frame, returning (tag, payload).
    pub async fn read_frame(&mut self) -> Result<(u8, Bytes)> {
        let tag = self.reader.read_u8().await.map_err(map_eof)?;
        let length = self.reader.read_i32().await.map_err(map_eof)? as usize;
        if length < 4 || length > self.max_frame_bytes {
            return Err(AdapterError::Protocol(format!(
                "frame length {} out of bounds",
                length
            )));
        }

        let mut payload = BytesMut::zeroed(length - 4);
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(map_eof)?;
        trace!("read frame '{}' ({} bytes)", tag as char, length - 4);
        Ok((tag, payload.freeze()))
    }

    /// Read and decode the next frontend message.
    pub async fn read_message(&mut self) -> Result<FrontendMessage> {
        let (tag, payload) = self.read_frame().await?;
        parse_frontend(tag, payload)
    }
}

fn map_eof(err: std::io::Error) -> AdapterError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        AdapterError::ConnectionClosed
    } else {
        AdapterError::Io(err)
    }
}

/// Decode a tagged frontend frame payload.
pub fn parse_frontend(tag: u8, payload: Bytes) -> Result<FrontendMessage> {
    let mut body = Reader::new(&payload);

    let message = match tag {
        b'p' => FrontendMessage::AuthResponse(payload.clone()),

        b'Q' => FrontendMessage::Query(body.cstring()?),

        b'P' => {
            let name = body.cstring()?;
            let query = body.cstring()?;
            let param_count = body.i16()? as usize;
            let mut param_types = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                param_types.push(body.i32()?);
            }
            FrontendMessage::Parse {
                name,
                query,
                param_types,
            }
        }

        b'B' => {
            let portal = body.cstring()?;
            let statement = body.cstring()?;

            let format_count = body.i16()? as usize;
            let mut param_formats = Vec::with_capacity(format_count);
            for _ in 0..format_count {
                param_formats.push(body.i16()?);
            }

            let param_count = body.i16()? as usize;
            let mut param_values = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                param_values.push(body.nullable_bytes()?);
            }

            let result_format_count = body.i16()? as usize;
            let mut result_formats = Vec::with_capacity(result_format_count);
            for _ in 0..result_format_count {
                result_formats.push(body.i16()?);
            }

            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                param_values,
                result_formats,
            }
        }

        b'D' => {
            let object_type = body.u8()?;
            let name = body.cstring()?;
            FrontendMessage::Describe { object_type, name }
        }

        b'E' => {
            let portal = body.cstring()?;
            let max_rows = body.i32()?;
            FrontendMessage::Execute { portal, max_rows }
        }

        b'S' => FrontendMessage::Sync,
        b'H' => FrontendMessage::Flush,

        b'C' => {
            let object_type = body.u8()?;
            let name = body.cstring()?;
            FrontendMessage::Close { object_type, name }
        }

        b'X' => FrontendMessage::Terminate,

        b'd' => FrontendMessage::CopyData(payload.clone()),
        b'c' => FrontendMessage::CopyDone,
        b'f' => FrontendMessage::CopyFail(body.cstring()?),

        other => FrontendMessage::Unknown {
            tag: other,
            body: payload.clone(),
        },
    };

    Ok(message)
}

/// Bounds-checked payload reader. Every accessor fails with a protocol error
/// instead of panicking when the frame is truncated.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Wrap a payload slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            Err(AdapterError::Protocol("truncated message".to_string()))
        } else {
            Ok(())
        }
    }

    /// Read a single byte.
    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a big-endian i16.
    pub fn i16(&mut self) -> Result<i16> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    /// Read a big-endian i32.
    pub fn i32(&mut self) -> Result<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    /// Read a NUL-terminated UTF-8 string.
    pub fn cstring(&mut self) -> Result<String> {
        let nul = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| AdapterError::Protocol("unterminated string".to_string()))?;
        let raw = &self.buf[..nul];
        let text = std::str::from_utf8(raw)
            .map_err(|e| AdapterError::Protocol(format!("invalid UTF-8 in message: {}", e)))?
            .to_string();
        self.buf.advance(nul + 1);
        Ok(text)
    }

    /// Read an i32-length-prefixed byte slice; -1 means NULL.
    pub fn nullable_bytes(&mut self) -> Result<Option<Bytes>> {
        let len = self.i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(AdapterError::Protocol(format!(
                "negative value length {}",
                len
            )));
        }
        let len = len as usize;
        self.need(len)?;
        let value = Bytes::copy_from_slice(&self.buf[..len]);
        self.buf.advance(len);
        Ok(Some(value))
    }

    /// Bytes left in the payload.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}
