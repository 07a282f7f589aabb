//! HTTP response encoder
//!
//! Serializes a complete `http::Response<Bytes>` into raw bytes: status line,
//! headers with an authoritative `Content-Length`, blank line and body.

use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderValue, Response};
use std::io;
use std::io::Write;
use tokio_util::codec::Encoder;

use crate::protocol::SendError;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Encoder for complete HTTP responses implementing the [`Encoder`] trait.
#[derive(Debug, Default)]
pub struct ResponseEncoder;

impl ResponseEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Response<Bytes>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut parts, body) = item.into_parts();

        dst.reserve(INIT_HEADER_SIZE + body.len());
        write!(
            FastWrite(dst),
            "HTTP/1.1 {} {}\r\n",
            parts.status.as_str(),
            parts.status.canonical_reason().unwrap_or_default()
        )?;

        parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

        for (header_name, header_value) in &parts.headers {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        dst.put_slice(&body);
        Ok(())
    }
}

/// Writer appending to a `BytesMut` which already reserved enough space.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
