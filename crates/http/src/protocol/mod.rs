//! Core HTTP protocol types shared by the codec and the connection layer.
//!
//! - **Request** ([`request`]): [`RequestHeader`] wraps the parsed request head,
//!   [`RawRequest`] adds the buffered body and the raw received bytes, and
//!   [`RequestFrame`] is what the decoder yields for each of them.
//! - **Error Handling** ([`error`]):
//!   - [`HttpError`]: Top-level error type
//!   - [`ParseError`]: Request parsing errors
//!   - [`SendError`]: Response sending errors

mod request;
pub use request::RawRequest;
pub use request::RequestFrame;
pub use request::RequestHeader;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
