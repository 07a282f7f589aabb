//! HTTP request decoder module
//!
//! Frames a request (head and `Content-Length` body) in two steps:
//!
//! 1. Head parsing: the request line and headers are parsed with [`decode_head`] and
//!    emitted as [`RequestFrame::Head`], leaving the head bytes in the buffer
//! 2. Body buffering: the announced size is checked against the limit, then the decoder
//!    waits for the whole body and emits [`RequestFrame::Complete`]
//!
//! # Example
//!
//! ```no_run
//! use ember_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new(1024 * 1024);
//! let mut buffer = BytesMut::from("GET / HTTP/1.1\r\n\r\n");
//! let head = decoder.decode(&mut buffer);
//! let request = decoder.decode(&mut buffer);
//! ```

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::header_decoder::{decode_head, ParsedHead};
use crate::ensure;
use crate::protocol::{ParseError, RawRequest, RequestFrame};

/// Upper bound on the buffer space reserved ahead of body bytes actually arriving.
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// A decoder producing the head and then the complete [`RawRequest`].
///
/// The decoder keeps the parsed head in `pending` while the body is still arriving.
#[derive(Debug)]
pub struct RequestDecoder {
    max_body_size: u64,
    pending: Option<ParsedHead>,
}

impl RequestDecoder {
    /// Creates a decoder rejecting bodies larger than `max_body_size` bytes
    pub fn new(max_body_size: u64) -> Self {
        Self { max_body_size, pending: None }
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl Decoder for RequestDecoder {
    type Item = RequestFrame;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.pending.is_none() {
            return match decode_head(src)? {
                Some(head) => {
                    let frame = RequestFrame::Head { header: head.header.clone(), body_len: head.body_len };
                    self.pending = Some(head);
                    Ok(Some(frame))
                }
                None => Ok(None),
            };
        }

        let (head_len, body_len) = match &self.pending {
            Some(head) => (head.head_len, head.body_len),
            None => return Ok(None),
        };
        ensure!(body_len <= self.max_body_size, ParseError::too_large_body(body_len, self.max_body_size));

        // body_len is bounded by max_body_size, which the caller sizes to fit in memory
        let total = head_len.saturating_add(usize::try_from(body_len).unwrap_or(usize::MAX));
        if src.len() < total {
            src.reserve((total - src.len()).min(BODY_CHUNK_SIZE));
            return Ok(None);
        }

        let Some(head) = self.pending.take() else {
            return Ok(None);
        };

        let raw = src.split_to(total).freeze();
        let body = raw.slice(head_len..);
        trace!(head_len, body_len, "decoded complete request");

        Ok(Some(RequestFrame::Complete(RawRequest::new(head.header, body, raw))))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(ParseError::Incomplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    fn expect_head(frame: Option<RequestFrame>) -> (crate::protocol::RequestHeader, u64) {
        match frame {
            Some(RequestFrame::Head { header, body_len }) => (header, body_len),
            other => panic!("expected a head frame, got {other:?}"),
        }
    }

    fn expect_complete(frame: Option<RequestFrame>) -> RawRequest {
        match frame {
            Some(RequestFrame::Complete(request)) => request,
            other => panic!("expected a complete frame, got {other:?}"),
        }
    }

    #[test]
    fn decode_get_without_body() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        Accept: */*

        "##};

        let mut decoder = RequestDecoder::default();
        let mut buf = BytesMut::from(str);

        let (header, body_len) = expect_head(decoder.decode(&mut buf).unwrap());
        assert_eq!(header.method(), &Method::GET);
        assert_eq!(body_len, 0);
        assert_eq!(buf.len(), str.len());

        let request = expect_complete(decoder.decode(&mut buf).unwrap());
        assert_eq!(request.header().uri().path(), "/index.html");
        assert!(request.body().is_empty());
        assert_eq!(request.raw().len(), str.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_body_in_two_reads() {
        let mut decoder = RequestDecoder::default();
        let mut buf = BytesMut::from("POST /login HTTP/1.1\r\nContent-Length: 11\r\n\r\nuser=");

        let (header, body_len) = expect_head(decoder.decode(&mut buf).unwrap());
        assert_eq!(header.uri().path(), "/login");
        assert_eq!(body_len, 11);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"alice123");
        let request = expect_complete(decoder.decode(&mut buf).unwrap());

        assert_eq!(&request.body()[..], b"user=alice1");
        assert!(request.raw().starts_with(b"POST /login HTTP/1.1\r\n"));
        assert!(request.raw().ends_with(b"user=alice1"));
        assert_eq!(&buf[..], b"23");
    }

    #[test]
    fn body_limit_is_checked_after_the_head() {
        let mut decoder = RequestDecoder::new(10);
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n");

        let (_, body_len) = expect_head(decoder.decode(&mut buf).unwrap());
        assert_eq!(body_len, 100);

        let result = decoder.decode(&mut buf);
        assert!(matches!(result, Err(ParseError::TooLargeBody { current_size: 100, max_size: 10 })));
    }

    #[test]
    fn large_announced_body_reserves_a_bounded_chunk() {
        let mut decoder = RequestDecoder::new(1 << 30);
        let mut buf = BytesMut::from("POST /upload HTTP/1.1\r\nContent-Length: 536870912\r\n\r\n");

        expect_head(decoder.decode(&mut buf).unwrap());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() < 1024 * 1024, "reserved {} bytes", buf.capacity());

        buf.extend_from_slice(&[b'x'; 1024]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() < 1024 * 1024, "reserved {} bytes", buf.capacity());
    }

    #[test]
    fn truncated_request_at_eof() {
        let mut decoder = RequestDecoder::default();
        let mut buf = BytesMut::from("POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab");
        expect_head(decoder.decode_eof(&mut buf).unwrap());
        assert!(matches!(decoder.decode_eof(&mut buf), Err(ParseError::Incomplete)));

        let mut empty = BytesMut::new();
        assert!(RequestDecoder::default().decode_eof(&mut empty).unwrap().is_none());
    }
}
