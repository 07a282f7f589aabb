//! Per-connection request processing.
//!
//! [`Pipeline`] is the server context shared by every connection task. It owns the rate
//! limiter, the session store and the handler, and drives one connection through:
//!
//! 1. read the request head
//! 2. resolve the client address and decide admission; rejected requests are dropped
//!    without a response and their body is never read
//! 3. read the body within `max_request_size`
//! 4. answer `OPTIONS` preflights directly
//! 5. build the [`Request`] and resolve its session
//! 6. invoke the handler
//! 7. persist session updates and mint the session cookie
//! 8. write the response and close the connection
//!
//! A response flagged with [`Response::stop_server`] cancels the server's shutdown token
//! once it has been written.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use ember_http::connection::{build_error_response, HttpConnection};
use ember_http::protocol::{ParseError, RequestHeader};
use http::header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN, ALLOW, DATE};
use http::{HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::date::DateService;
use crate::error::PipelineError;
use crate::handler::Handler;
use crate::limiter::{Admission, RateLimiter};
use crate::request::Request;
use crate::session::{SessionBackend, SessionResolution, SessionStore};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// the peer closed the connection before sending a request
    Closed,
    /// dropped by the blacklist or the rate limiter
    Rejected(Admission),
    Served(StatusCode),
}

pub struct Pipeline {
    config: ServerConfig,
    limiter: Arc<RateLimiter>,
    sessions: SessionStore,
    handler: Arc<dyn Handler>,
    date_service: DateService,
    shutdown: CancellationToken,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("sessions", &self.sessions)
            .field("date_service", &self.date_service)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates the shared context. Must be called within a tokio runtime.
    pub fn new(
        config: ServerConfig,
        handler: Arc<dyn Handler>,
        session_backend: Arc<dyn SessionBackend>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::from_config(&config)),
            sessions: SessionStore::new(session_backend, &config),
            config,
            handler,
            date_service: DateService::new(),
            shutdown,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Processes the single request of one connection.
    ///
    /// Requests that can't be framed are answered with `400`, `413`, `431` or `501` and
    /// returned as errors, unless the socket peer is blacklisted, in which case the
    /// connection is dropped silently. A failing session write is answered with `500` and returned as
    /// an error as well.
    pub async fn serve<R, W>(&self, reader: R, writer: W, peer: IpAddr) -> Result<Outcome, PipelineError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut connection = HttpConnection::new(reader, writer, self.config.max_request_size);

        let header = match connection.read_head().await {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(Outcome::Closed),
            Err(e) if self.limiter.is_blacklisted(&peer.to_string()) => {
                debug!(client = %peer, cause = %e, "unframed request from blacklisted client dropped");
                return Ok(Outcome::Rejected(Admission::Blacklisted));
            }
            Err(e) => return self.refuse(connection, e).await,
        };

        let client = self.client_address(&header, peer);
        let admission = self.limiter.admit(&client, header.uri().path());
        if !admission.is_admitted() {
            debug!(client = %client, endpoint = header.uri().path(), ?admission, "request rejected");
            return Ok(Outcome::Rejected(admission));
        }

        let raw = match connection.read_body().await {
            Ok(raw) => raw,
            Err(e) => return self.refuse(connection, e).await,
        };

        if raw.header().method() == Method::OPTIONS {
            let status = self.write(connection, preflight_response()).await?;
            return Ok(Outcome::Served(status));
        }

        let mut request = Request::from_raw(raw, client);
        let resolution = self.sessions.resolve(request.cookies_mut()).await;
        if let SessionResolution::Valid { id, data } = &resolution {
            request.attach_session(id.clone(), data.clone());
        }

        let mut response = match self.handler.handle(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(cause = %e, "handler failed");
                let status = self.write(connection, build_error_response(StatusCode::INTERNAL_SERVER_ERROR)).await?;
                return Ok(Outcome::Served(status));
            }
        };

        if let Err(e) = self.sessions.finalize(resolution, &mut response).await {
            error!(cause = %e, "can't persist session");
            self.write(connection, build_error_response(StatusCode::INTERNAL_SERVER_ERROR)).await?;
            return Err(e.into());
        }

        let stop_server = response.stops_server();
        let status = self.write(connection, response.into_http()).await?;

        if stop_server {
            info!("handler requested server stop");
            self.shutdown.cancel();
        }
        Ok(Outcome::Served(status))
    }

    /// Answers a request that could not be framed and reports the framing error.
    async fn refuse<R, W>(&self, mut connection: HttpConnection<R, W>, e: ParseError) -> Result<Outcome, PipelineError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        connection.send_parse_error(&e).await?;
        connection.shutdown().await?;
        Err(e.into())
    }

    /// The socket peer, or the first `X-Forwarded-For` entry when that header is trusted.
    fn client_address(&self, header: &RequestHeader, peer: IpAddr) -> String {
        if self.config.trust_x_forwarded_for {
            let forwarded = header
                .header_str(X_FORWARDED_FOR)
                .and_then(|value| value.split(',').next())
                .map(str::trim)
                .filter(|value| !value.is_empty());
            if let Some(forwarded) = forwarded {
                return forwarded.to_string();
            }
        }
        peer.to_string()
    }

    async fn write<R, W>(
        &self,
        mut connection: HttpConnection<R, W>,
        mut response: http::Response<Bytes>,
    ) -> Result<StatusCode, PipelineError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        response.headers_mut().insert(DATE, self.date_service.http_date());
        let status = response.status();

        connection.send_response(response).await?;
        connection.shutdown().await?;
        Ok(status)
    }
}

fn preflight_response() -> http::Response<Bytes> {
    let mut response = build_error_response(StatusCode::NO_CONTENT);
    let headers = response.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("Content-Type"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitRule;
    use crate::error::SessionError;
    use crate::handler::{handler_fn, HandlerError};
    use crate::response::Response;
    use crate::session::{MemorySessionBackend, MockSessionBackend, SessionMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    const REMOTE: &str = "192.0.2.10";

    fn test_handler(calls: Arc<AtomicUsize>) -> Arc<dyn Handler> {
        Arc::new(handler_fn(move |request: Request| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                let response = match request.endpoint() {
                    "/fail" => return Err(HandlerError::from("boom")),
                    "/stop" => Response::from("bye").stop_server(),
                    "/redirect" => Response::new().redirect("/elsewhere"),
                    "/visit" => {
                        let visits = request.session().get("visits").map_or(0, |v| v.parse().unwrap_or(0));
                        let seen_user = request.cookie("username").map_or("", |c| c.value.as_str()).to_string();
                        Response::from(format!("visits={visits} user={seen_user}"))
                            .session("visits", (visits + 1).to_string())
                    }
                    endpoint => Response::from(format!("hello from {endpoint}")),
                };
                Ok(response)
            }
        }))
    }

    struct Harness {
        pipeline: Pipeline,
        backend: Arc<MemorySessionBackend>,
        calls: Arc<AtomicUsize>,
        shutdown: CancellationToken,
    }

    fn harness(config: ServerConfig) -> Harness {
        let backend = Arc::new(MemorySessionBackend::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let pipeline = Pipeline::new(config, test_handler(calls.clone()), backend.clone(), shutdown.clone());
        Harness { pipeline, backend, calls, shutdown }
    }

    async fn exchange(pipeline: &Pipeline, peer: &str, request: &str) -> (Result<Outcome, PipelineError>, String) {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(request.as_bytes()).await.unwrap();
        if request.is_empty() {
            client_write.shutdown().await.unwrap();
        }

        let outcome = pipeline.serve(server_read, server_write, peer.parse().unwrap()).await;

        let mut received = String::new();
        client_read.read_to_string(&mut received).await.unwrap();
        (outcome, received)
    }

    fn get(path: &str, extra_headers: &str) -> String {
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n{extra_headers}\r\n")
    }

    fn set_cookies(received: &str) -> Vec<&str> {
        received.lines().filter_map(|line| line.strip_prefix("set-cookie: ")).collect()
    }

    fn session_cookie_value(received: &str) -> Option<String> {
        set_cookies(received)
            .into_iter()
            .find_map(|c| c.strip_prefix("session_id="))
            .and_then(|rest| rest.split(';').next())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn serves_and_mints_session() {
        let h = harness(ServerConfig::default());

        let (outcome, received) = exchange(&h.pipeline, REMOTE, &get("/visit?x=1", "")).await;

        assert_eq!(outcome.unwrap(), Outcome::Served(StatusCode::OK));
        assert!(received.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(received.contains("content-type: application/json\r\n"));
        assert!(received.contains("access-control-allow-origin: *\r\n"));
        assert!(received.contains("date: "));
        assert!(received.ends_with("\r\n\r\nvisits=0 user="));

        let id = session_cookie_value(&received).unwrap();
        assert_eq!(id.len(), 64);
        assert!(set_cookies(&received)[0].contains("HttpOnly; "));
        assert!(set_cookies(&received)[0].contains("SameSite=Strict; "));
        let record = h.backend.read(&id).await.unwrap().unwrap();
        assert_eq!(record["visits"], "1");
    }

    #[tokio::test]
    async fn secure_session_cookie() {
        let h = harness(ServerConfig { session_is_secure: true, ..ServerConfig::default() });

        let (_, received) = exchange(&h.pipeline, REMOTE, &get("/visit", "")).await;

        let cookies = set_cookies(&received);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("session_id="));
        assert!(cookies[0].contains("Secure; "));
        assert!(cookies[0].contains("HttpOnly; "));

        let plain = harness(ServerConfig::default());
        let (_, received) = exchange(&plain.pipeline, REMOTE, &get("/visit", "")).await;
        assert!(!set_cookies(&received)[0].contains("Secure; "));
    }

    #[tokio::test]
    async fn valid_session_is_merged() {
        let h = harness(ServerConfig::default());
        h.backend.insert("abc", SessionMap::from([("visits".into(), "4".into()), ("user".into(), "ada".into())]));

        let (outcome, received) =
            exchange(&h.pipeline, REMOTE, &get("/visit", "Cookie: session_id=abc; username=ada\r\n")).await;

        assert_eq!(outcome.unwrap(), Outcome::Served(StatusCode::OK));
        assert!(received.ends_with("visits=4 user=ada"));
        assert!(set_cookies(&received).is_empty());

        let record = h.backend.read("abc").await.unwrap().unwrap();
        assert_eq!(record["visits"], "5");
        assert_eq!(record["user"], "ada");
    }

    #[tokio::test]
    async fn invalid_session_is_replaced() {
        let config = ServerConfig { associated_session_cookies: vec!["username".into()], ..ServerConfig::default() };
        let h = harness(config);

        let (_, received) =
            exchange(&h.pipeline, REMOTE, &get("/visit", "Cookie: session_id=stale; username=ada\r\n")).await;

        // the handler never sees cookies tied to the stale session
        assert!(received.ends_with("visits=0 user="));

        let cookies = set_cookies(&received);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[1].starts_with("username=; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0"));

        let id = session_cookie_value(&received).unwrap();
        assert_ne!(id, "stale");
        assert!(h.backend.read(&id).await.unwrap().is_some());
        assert!(h.backend.read("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sessions_disabled() {
        let h = harness(ServerConfig { enable_session: false, ..ServerConfig::default() });

        let (_, received) = exchange(&h.pipeline, REMOTE, &get("/visit", "Cookie: session_id=abc\r\n")).await;

        assert!(set_cookies(&received).is_empty());
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_requests_are_dropped() {
        let config = ServerConfig { rate_limits: vec![RateLimitRule::new("/limited", 1)], ..ServerConfig::default() };
        let h = harness(config);

        let (first, _) = exchange(&h.pipeline, REMOTE, &get("/limited", "")).await;
        assert_eq!(first.unwrap(), Outcome::Served(StatusCode::OK));

        let (second, received) = exchange(&h.pipeline, REMOTE, &get("/limited", "")).await;
        assert_eq!(second.unwrap(), Outcome::Rejected(Admission::RateLimited));
        assert!(received.is_empty());

        // other endpoints and whitelisted clients are unaffected
        let (other, _) = exchange(&h.pipeline, REMOTE, &get("/other", "")).await;
        assert_eq!(other.unwrap(), Outcome::Served(StatusCode::OK));
        let (local, _) = exchange(&h.pipeline, "127.0.0.1", &get("/limited", "")).await;
        assert_eq!(local.unwrap(), Outcome::Served(StatusCode::OK));

        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn forwarded_for_is_trusted_only_when_configured() {
        let blacklisted = ServerConfig { blacklisted_ips: vec!["198.51.100.4".into()], ..ServerConfig::default() };
        let header = "X-Forwarded-For: 198.51.100.4, 10.0.0.1\r\n";

        let untrusting = harness(blacklisted.clone());
        let (outcome, _) = exchange(&untrusting.pipeline, "127.0.0.1", &get("/", header)).await;
        assert_eq!(outcome.unwrap(), Outcome::Served(StatusCode::OK));

        let trusting = harness(ServerConfig { trust_x_forwarded_for: true, ..blacklisted });
        let (outcome, received) = exchange(&trusting.pipeline, "127.0.0.1", &get("/", header)).await;
        assert_eq!(outcome.unwrap(), Outcome::Rejected(Admission::Blacklisted));
        assert!(received.is_empty());
        assert_eq!(trusting.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn options_preflight_skips_handler() {
        let h = harness(ServerConfig::default());

        let (outcome, received) = exchange(&h.pipeline, REMOTE, "OPTIONS /api HTTP/1.1\r\n\r\n").await;

        assert_eq!(outcome.unwrap(), Outcome::Served(StatusCode::NO_CONTENT));
        assert!(received.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(received.contains("allow: GET, HEAD, OPTIONS\r\n"));
        assert!(received.contains("access-control-allow-headers: Content-Type\r\n"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn handler_error_becomes_500() {
        let h = harness(ServerConfig::default());

        let (outcome, received) = exchange(&h.pipeline, REMOTE, &get("/fail", "")).await;

        assert_eq!(outcome.unwrap(), Outcome::Served(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(received.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(set_cookies(&received).is_empty());
    }

    #[tokio::test]
    async fn redirect() {
        let h = harness(ServerConfig::default());

        let (_, received) = exchange(&h.pipeline, REMOTE, &get("/redirect", "")).await;

        assert!(received.starts_with("HTTP/1.1 307 Temporary Redirect\r\n"));
        assert!(received.contains("location: /elsewhere\r\n"));
    }

    #[tokio::test]
    async fn stop_flag_cancels_after_write() {
        let h = harness(ServerConfig::default());
        assert!(!h.shutdown.is_cancelled());

        let (outcome, received) = exchange(&h.pipeline, REMOTE, &get("/stop", "")).await;

        assert_eq!(outcome.unwrap(), Outcome::Served(StatusCode::OK));
        assert!(received.ends_with("bye"));
        assert!(h.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn session_write_failure_is_hard() {
        let mut backend = MockSessionBackend::new();
        backend.expect_read().returning(|_| Ok(None));
        backend.expect_write().returning(|_, _| Err(SessionError::backend("disk full")));

        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline =
            Pipeline::new(ServerConfig::default(), test_handler(calls), Arc::new(backend), CancellationToken::new());

        let (outcome, received) = exchange(&pipeline, REMOTE, &get("/visit", "")).await;

        assert!(matches!(outcome, Err(PipelineError::Session(_))));
        assert!(received.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(set_cookies(&received).is_empty());
    }

    #[tokio::test]
    async fn oversized_request_is_refused() {
        let h = harness(ServerConfig { max_request_size: 8, ..ServerConfig::default() });

        let (outcome, received) =
            exchange(&h.pipeline, REMOTE, "POST /upload HTTP/1.1\r\nContent-Length: 64\r\n\r\n").await;

        assert!(matches!(outcome, Err(PipelineError::Http(_))));
        assert!(received.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blacklisted_client_is_dropped_before_the_body() {
        let config = ServerConfig {
            blacklisted_ips: vec!["192.0.2.66".into()],
            max_request_size: 8,
            ..ServerConfig::default()
        };
        let h = harness(config);

        let (outcome, received) =
            exchange(&h.pipeline, "192.0.2.66", "POST /upload HTTP/1.1\r\nContent-Length: 64\r\n\r\n").await;

        assert_eq!(outcome.unwrap(), Outcome::Rejected(Admission::Blacklisted));
        assert!(received.is_empty());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn malformed_request_from_blacklisted_client_gets_no_reply() {
        let h = harness(ServerConfig { blacklisted_ips: vec!["192.0.2.66".into()], ..ServerConfig::default() });

        let (outcome, received) = exchange(&h.pipeline, "192.0.2.66", "GET / HTTP/1.1\r\nBad Header\r\n\r\n").await;

        assert_eq!(outcome.unwrap(), Outcome::Rejected(Admission::Blacklisted));
        assert!(received.is_empty());

        let (outcome, received) = exchange(&h.pipeline, REMOTE, "GET / HTTP/1.1\r\nBad Header\r\n\r\n").await;
        assert!(matches!(outcome, Err(PipelineError::Http(_))));
        assert!(received.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn debug_output_names_the_context() {
        let h = harness(ServerConfig::default());

        let debug = format!("{:?}", h.pipeline);
        assert!(debug.starts_with("Pipeline {"));
        assert!(debug.contains("SessionStore {"));
        assert!(debug.contains("cookie_name: \"session_id\""));
        assert!(debug.ends_with(".. }"));
    }

    #[tokio::test]
    async fn closed_without_request() {
        let h = harness(ServerConfig::default());

        let (outcome, received) = exchange(&h.pipeline, REMOTE, "").await;

        assert_eq!(outcome.unwrap(), Outcome::Closed);
        assert!(received.is_empty());
    }
}
