//! Errors raised while framing a request or writing a response.
//!
//! Each variant of [`ParseError`] maps to the status the connection answers with: header
//! limits to `431`, body limits to `413`, chunked requests to `501` and the rest to `400`.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    /// the announced `Content-Length` is above the configured maximum request size
    #[error("body size {current_size} exceed the limit {max_size}")]
    TooLargeBody { current_size: u64, max_size: u64 },

    /// only `Content-Length` framed bodies are accepted
    #[error("unsupported transfer encoding: {encoding}")]
    UnsupportedTransferEncoding { encoding: String },

    #[error("connection closed before the request was complete")]
    Incomplete,

    /// a body was requested before the head, or a second head arrived
    #[error("request frames arrived out of order")]
    UnexpectedFrame,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn too_large_body(current_size: u64, max_size: u64) -> Self {
        Self::TooLargeBody { current_size, max_size }
    }

    pub fn unsupported_transfer_encoding<S: ToString>(str: S) -> Self {
        Self::UnsupportedTransferEncoding { encoding: str.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
