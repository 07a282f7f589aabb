//! Protocol building blocks for the ember embedded HTTP server.
//!
//! This crate contains everything that operates on a single message without any
//! shared state:
//!
//! - [`connection`]: reads one framed request from an async stream and writes one response
//! - [`codec`]: the request decoder and response encoder behind the connection
//! - [`protocol`]: request and error types
//! - [`form`]: url-encoded field decoding, percent-encoding and HTML escaping
//! - [`multipart`]: `multipart/form-data` fields and file uploads
//! - [`cookie`]: `Cookie` header parsing and `Set-Cookie` serialization
//! - [`content_type`]: file extension to MIME type lookup
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use ember_http::connection::HttpConnection;
//! use http::Response;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let (stream, _addr) = listener.accept().await?;
//!     let (reader, writer) = stream.into_split();
//!
//!     let mut connection = HttpConnection::new(reader, writer, 1024 * 1024);
//!     if let Some(request) = connection.read_request().await? {
//!         let body = Bytes::from(format!("you asked for {}", request.header().uri().path()));
//!         connection.send_response(Response::new(body)).await?;
//!     }
//!     connection.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Limitations
//!
//! - One request per connection
//! - `Content-Length` bodies only, chunked requests are refused
//! - Maximum header size: 8KB
//! - Maximum number of headers: 64

pub mod codec;
pub mod connection;
pub mod content_type;
pub mod cookie;
pub mod form;
pub mod multipart;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
pub use utils::{random_token, sha256_hex, DEFAULT_TOKEN_LEN};
