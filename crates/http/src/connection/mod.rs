//! Connection handling: reading one framed request and writing one response.

mod http_connection;

pub use http_connection::build_error_response;
pub use http_connection::HttpConnection;
