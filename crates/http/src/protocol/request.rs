//! Parsed HTTP requests as delivered by the transport layer.
//!
//! [`RequestHeader`] wraps the standard `http::Request<()>` head, and [`RawRequest`]
//! pairs it with the fully buffered body and the bytes exactly as they were received.

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// Represents an HTTP request header.
#[derive(Debug, Clone)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Returns a reference to the request's HTTP method.
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    /// Returns a reference to the request's URI.
    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    /// Returns the request's HTTP version.
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Returns a reference to the request's headers.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Returns the first value of header `name` as a string, if present and visible ASCII.
    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.inner.headers().get(name).and_then(|value| value.to_str().ok())
    }

    /// Determines if this request may carry a body based on its HTTP method.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// A complete request: the parsed head, the decoded body, and the raw bytes
/// (header section followed by body) as they arrived on the wire.
///
/// The raw bytes are kept for consumers that re-parse the message themselves,
/// such as the multipart codec which locates the `boundary=` parameter in the headers.
#[derive(Debug)]
pub struct RawRequest {
    header: RequestHeader,
    body: Bytes,
    raw: Bytes,
}

impl RawRequest {
    pub fn new(header: RequestHeader, body: Bytes, raw: Bytes) -> Self {
        Self { header, body, raw }
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn into_parts(self) -> (RequestHeader, Bytes, Bytes) {
        (self.header, self.body, self.raw)
    }
}

/// A frame produced by the request decoder.
///
/// The head is emitted as soon as it is parsed so the caller can decide whether to accept
/// the request before its body is read. `Complete` follows once the body is buffered.
#[derive(Debug)]
pub enum RequestFrame {
    Head { header: RequestHeader, body_len: u64 },
    Complete(RawRequest),
}
