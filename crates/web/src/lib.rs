//! The request processing core of the ember embedded HTTP server.
//!
//! One application [`Handler`] receives every admitted request. Around it the server
//! applies per-client rate limiting, cookie-based server-side sessions, redirects and
//! cookie management, as configured by [`ServerConfig`].
//!
//! # Example
//!
//! ```no_run
//! use ember_web::{handler_fn, HandlerError, Request, Response, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .config(ServerConfig { port: 8080, ..ServerConfig::default() })
//!         .handler(handler_fn(|request: Request| async move {
//!             let visits: u64 = request.session().get("visits").and_then(|v| v.parse().ok()).unwrap_or(0);
//!             Ok::<_, HandlerError>(Response::text(format!("visit #{}", visits + 1)).session("visits", (visits + 1).to_string()))
//!         }))
//!         .build()?;
//!
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

mod date;
mod error;
mod handler;
mod pipeline;
mod request;
mod response;
mod server;

pub mod config;
pub mod limiter;
pub mod session;

pub use config::RateLimitRule;
pub use config::ServerConfig;
pub use error::ConfigError;
pub use error::PipelineError;
pub use error::ServerBuildError;
pub use error::ServerError;
pub use error::SessionError;
pub use handler::handler_fn;
pub use handler::Handler;
pub use handler::HandlerError;
pub use handler::HandlerFn;
pub use limiter::Admission;
pub use limiter::RateLimiter;
pub use pipeline::Outcome;
pub use pipeline::Pipeline;
pub use request::Request;
pub use response::RedirectKind;
pub use response::Response;
pub use server::Server;
pub use server::ServerBuilder;
pub use session::SessionBackend;
pub use session::SessionMap;
pub use session::SessionStore;
