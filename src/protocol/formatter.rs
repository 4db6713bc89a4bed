//! Backend message encoding and buffered writing
//!
//! The write side of the wire codec. Messages are encoded into an in-memory
//! buffer and flushed at protocol sync points: after ReadyForQuery, after
//! ErrorResponse, after authentication exchanges, and once buffered CopyData
//! reaches the chunk threshold.

use crate::error::Result;
use crate::protocol::message::{
    AuthenticationRequest, BackendMessage, ErrorFields, FieldDescription,
};
use bytes::{BufMut, BytesMut};
use log::trace;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Buffered CopyData is flushed once this many bytes accumulate.
pub const COPY_FLUSH_BYTES: usize = 8 * 1024;

/// Buffered writer for backend messages.
pub struct MessageWriter<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    /// Wrap an async writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Encode a message into the output buffer without flushing.
    pub fn queue(&mut self, message: &BackendMessage) {
        encode_backend(&mut self.buf, message);
        trace!("queued {:?} ({} bytes buffered)", tag_of(message), self.buf.len());
    }

    /// Encode a message and flush if it ends a protocol exchange.
    pub async fn send(&mut self, message: &BackendMessage) -> Result<()> {
        let flush_now = matches!(
            message,
            BackendMessage::ReadyForQuery(_)
                | BackendMessage::ErrorResponse(_)
                | BackendMessage::Authentication(_)
                | BackendMessage::SslResponse(_)
                | BackendMessage::CopyInResponse { .. }
                | BackendMessage::CopyDone
        ) || (matches!(message, BackendMessage::CopyData(_))
            && self.buf.len() >= COPY_FLUSH_BYTES);

        self.queue(message);
        if flush_now {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write out everything buffered.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.writer.write_all(&self.buf).await?;
            self.buf.clear();
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn tag_of(message: &BackendMessage) -> char {
    match message {
        BackendMessage::Authentication(_) => 'R',
        BackendMessage::BackendKeyData { .. } => 'K',
        BackendMessage::ParameterStatus { .. } => 'S',
        BackendMessage::ReadyForQuery(_) => 'Z',
        BackendMessage::CommandComplete(_) => 'C',
        BackendMessage::RowDescription(_) => 'T',
        BackendMessage::DataRow(_) => 'D',
        BackendMessage::EmptyQueryResponse => 'I',
        BackendMessage::ErrorResponse(_) => 'E',
        BackendMessage::NoticeResponse(_) => 'N',
        BackendMessage::ParseComplete => '1',
        BackendMessage::BindComplete => '2',
        BackendMessage::PortalSuspended => 's',
        BackendMessage::NoData => 'n',
        BackendMessage::ParameterDescription(_) => 't',
        BackendMessage::CloseComplete => '3',
        BackendMessage::CopyInResponse { .. } => 'G',
        BackendMessage::CopyOutResponse { .. } => 'H',
        BackendMessage::CopyData(_) => 'd',
        BackendMessage::CopyDone => 'c',
        BackendMessage::SslResponse(_) => '?',
    }
}

/// Encode one backend message into `buffer` in wire format.
pub fn encode_backend(buffer: &mut BytesMut, message: &BackendMessage) {
    match message {
        BackendMessage::Authentication(auth_request) => {
            write_authentication(buffer, auth_request);
        }
        BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        } => {
            write_message(buffer, b'K', |buf| {
                buf.put_i32(*process_id);
                buf.put_i32(*secret_key);
            });
        }
        BackendMessage::ParameterStatus { name, value } => {
            write_message(buffer, b'S', |buf| {
                write_cstring(buf, name);
                write_cstring(buf, value);
            });
        }
        BackendMessage::ReadyForQuery(status) => {
            write_message(buffer, b'Z', |buf| {
                buf.put_u8(status.to_byte());
            });
        }
        BackendMessage::CommandComplete(tag) => {
            write_message(buffer, b'C', |buf| {
                write_cstring(buf, tag);
            });
        }
        BackendMessage::RowDescription(fields) => {
            write_message(buffer, b'T', |buf| {
                buf.put_i16(fields.len() as i16);
                for field in fields {
                    write_field(buf, field);
                }
            });
        }
        BackendMessage::DataRow(values) => {
            write_message(buffer, b'D', |buf| {
                buf.put_i16(values.len() as i16);
                for value in values {
                    match value {
                        Some(bytes) => {
                            buf.put_i32(bytes.len() as i32);
                            buf.put_slice(bytes);
                        }
                        None => buf.put_i32(-1),
                    }
                }
            });
        }
        BackendMessage::EmptyQueryResponse => write_message(buffer, b'I', |_| {}),
        BackendMessage::ErrorResponse(fields) => write_error_or_notice(buffer, b'E', fields),
        BackendMessage::NoticeResponse(fields) => write_error_or_notice(buffer, b'N', fields),
        BackendMessage::ParseComplete => write_message(buffer, b'1', |_| {}),
        BackendMessage::BindComplete => write_message(buffer, b'2', |_| {}),
        BackendMessage::PortalSuspended => write_message(buffer, b's', |_| {}),
        BackendMessage::NoData => write_message(buffer, b'n', |_| {}),
        BackendMessage::ParameterDescription(types) => {
            write_message(buffer, b't', |buf| {
                buf.put_i16(types.len() as i16);
                for type_oid in types {
                    buf.put_i32(*type_oid);
                }
            });
        }
        BackendMessage::CloseComplete => write_message(buffer, b'3', |_| {}),
        BackendMessage::CopyInResponse {
            format,
            column_formats,
        } => {
            write_message(buffer, b'G', |buf| {
                buf.put_i8(*format);
                buf.put_i16(column_formats.len() as i16);
                for format_code in column_formats {
                    buf.put_i16(*format_code);
                }
            });
        }
        BackendMessage::CopyOutResponse {
            format,
            column_formats,
        } => {
            write_message(buffer, b'H', |buf| {
                buf.put_i8(*format);
                buf.put_i16(column_formats.len() as i16);
                for format_code in column_formats {
                    buf.put_i16(*format_code);
                }
            });
        }
        BackendMessage::CopyData(data) => {
            write_message(buffer, b'd', |buf| {
                buf.put_slice(data);
            });
        }
        BackendMessage::CopyDone => write_message(buffer, b'c', |_| {}),
        BackendMessage::SslResponse(supported) => {
            // Single byte, no frame header
            buffer.put_u8(if *supported { b'S' } else { b'N' });
        }
    }
}

/// Write a tagged message, backfilling the length field.
fn write_message<F>(buffer: &mut BytesMut, tag: u8, writer: F)
where
    F: FnOnce(&mut BytesMut),
{
    buffer.put_u8(tag);
    let length_pos = buffer.len();
    buffer.put_i32(0); // placeholder

    let body_start = buffer.len();
    writer(buffer);
    let body_end = buffer.len();

    // Length includes itself but not the tag
    let message_length = (body_end - body_start + 4) as i32;
    buffer[length_pos..length_pos + 4].copy_from_slice(&message_length.to_be_bytes());
}

fn write_authentication(buffer: &mut BytesMut, auth_request: &AuthenticationRequest) {
    write_message(buffer, b'R', |buf| match auth_request {
        AuthenticationRequest::Ok => buf.put_i32(0),
        AuthenticationRequest::CleartextPassword => buf.put_i32(3),
        AuthenticationRequest::Md5Password { salt } => {
            buf.put_i32(5);
            buf.put_slice(salt);
        }
        AuthenticationRequest::Sasl { mechanisms } => {
            buf.put_i32(10);
            for mechanism in mechanisms {
                write_cstring(buf, mechanism);
            }
            buf.put_u8(0); // end of mechanism list
        }
        AuthenticationRequest::SaslContinue { data } => {
            buf.put_i32(11);
            buf.put_slice(data);
        }
        AuthenticationRequest::SaslFinal { data } => {
            buf.put_i32(12);
            buf.put_slice(data);
        }
    });
}

fn write_error_or_notice(buffer: &mut BytesMut, tag: u8, fields: &ErrorFields) {
    write_message(buffer, tag, |buf| {
        buf.put_u8(b'S');
        write_cstring(buf, &fields.severity);
        buf.put_u8(b'V');
        write_cstring(buf, &fields.severity);
        buf.put_u8(b'C');
        write_cstring(buf, &fields.code);
        buf.put_u8(b'M');
        write_cstring(buf, &fields.message);
        if let Some(detail) = &fields.detail {
            buf.put_u8(b'D');
            write_cstring(buf, detail);
        }
        if let Some(hint) = &fields.hint {
            buf.put_u8(b'H');
            write_cstring(buf, hint);
        }
        if let Some(position) = fields.position {
            buf.put_u8(b'P');
            write_cstring(buf, &position.to_string());
        }
        buf.put_u8(0);
    });
}

fn write_field(buf: &mut BytesMut, field: &FieldDescription) {
    write_cstring(buf, &field.name);
    buf.put_i32(field.table_oid);
    buf.put_i16(field.column_id);
    buf.put_i32(field.data_type_oid);
    buf.put_i16(field.data_type_size);
    buf.put_i32(field.type_modifier);
    buf.put_i16(field.format_code);
}

fn write_cstring(buffer: &mut BytesMut, value: &str) {
    buffer.put_slice(value.as_bytes());
    buffer.put_u8(0);
}
