//! HTTP codec module for decoding requests and encoding responses
//!
//! - [`RequestDecoder`]: yields the request head, then the complete request once the `Content-Length` body is buffered
//! - [`ResponseEncoder`]: serializes a complete response
//!
//! # Example
//!
//! ```no_run
//! use ember_http::codec::{RequestDecoder, ResponseEncoder};
//! use tokio_util::codec::Decoder;
//! use bytes::BytesMut;
//!
//! let mut decoder = RequestDecoder::new(8 * 1024 * 1024);
//! let mut request_buffer = BytesMut::new();
//! let request = decoder.decode(&mut request_buffer);
//! ```

mod header_decoder;
mod request_decoder;
mod response_encoder;

pub use header_decoder::{decode_head, ParsedHead, MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
