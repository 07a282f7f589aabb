//! HTTP request head parsing.
//!
//! Parses the request line and header fields of a buffered request with `httparse`
//! and converts them into a typed [`RequestHeader`], then works out how many body
//! bytes follow the head.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB
//! - Only HTTP/1.0 and HTTP/1.1
//! - Only `Content-Length` delimited bodies; `Transfer-Encoding` is refused

use http::{HeaderName, HeaderValue, Request};
use httparse::{Error, Status};
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, RequestHeader};

/// Maximum number of headers allowed in a request
pub const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// A parsed request head together with its framing information.
#[derive(Debug)]
pub struct ParsedHead {
    pub header: RequestHeader,
    /// number of bytes occupied by the request line and headers, including the blank line
    pub head_len: usize,
    /// number of body bytes announced by `Content-Length`
    pub body_len: u64,
}

/// Attempts to parse a request head from the start of `src`.
///
/// Returns `Ok(None)` if more data is needed.
pub fn decode_head(src: &[u8]) -> Result<Option<ParsedHead>, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    let mut req = httparse::Request::new(&mut headers);

    let status = req.parse(src).map_err(|e| match e {
        Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        e => ParseError::invalid_header(e.to_string()),
    })?;

    let head_len = match status {
        Status::Complete(head_len) => head_len,
        Status::Partial => {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            return Ok(None);
        }
    };

    trace!(head_len, "parsed request head");
    ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));

    let version = match req.version {
        Some(0) => http::Version::HTTP_10,
        Some(1) => http::Version::HTTP_11,
        _ => return Err(ParseError::InvalidVersion(req.version)),
    };

    let mut builder = Request::builder()
        .method(req.method.ok_or(ParseError::InvalidMethod)?)
        .uri(req.path.ok_or(ParseError::InvalidUri)?)
        .version(version);

    if let Some(header_map) = builder.headers_mut() {
        header_map.reserve(req.headers.len());
        for header in req.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_bytes(header.value).map_err(ParseError::invalid_header)?;
            header_map.append(name, value);
        }
    }

    // the builder only fails on an invalid method or uri
    let header = match builder.body(()) {
        Ok(request) => RequestHeader::from(request),
        Err(e) if e.is::<http::method::InvalidMethod>() => return Err(ParseError::InvalidMethod),
        Err(_) => return Err(ParseError::InvalidUri),
    };

    let body_len = parse_body_len(&header)?;
    Ok(Some(ParsedHead { header, head_len, body_len }))
}

/// Determines the body length of the request.
///
/// refer: <https://www.rfc-editor.org/rfc/rfc9112.html#name-message-body-length>
fn parse_body_len(header: &RequestHeader) -> Result<u64, ParseError> {
    if let Some(te_value) = header.headers().get(http::header::TRANSFER_ENCODING) {
        let encoding = String::from_utf8_lossy(te_value.as_bytes()).into_owned();
        return Err(ParseError::unsupported_transfer_encoding(encoding));
    }

    match header.headers().get(http::header::CONTENT_LENGTH) {
        None => Ok(0),
        Some(cl_value) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;
            cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))
        }
    }
}
