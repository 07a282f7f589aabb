//! The listening server.
//!
//! [`Server`] binds a TCP listener and spawns one task per accepted connection, each
//! driving the shared [`Pipeline`]. A background task sweeps stale rate limit entries.
//! The accept loop ends when the [`CancellationToken`] from [`Server::shutdown_handle`]
//! is cancelled, either by the embedding application or by a handler response flagged
//! with [`Response::stop_server`](crate::Response::stop_server).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::ServerConfig;
use crate::error::{ServerBuildError, ServerError};
use crate::handler::Handler;
use crate::pipeline::{Outcome, Pipeline};
use crate::session::{FileSessionBackend, SessionBackend};

pub struct ServerBuilder {
    config: ServerConfig,
    handler: Option<Arc<dyn Handler>>,
    session_backend: Option<Arc<dyn SessionBackend>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    fn new() -> Self {
        Self { config: ServerConfig::default(), handler: None, session_backend: None }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Replaces the default file backend rooted at the configured session directory.
    pub fn session_backend(mut self, backend: impl SessionBackend + 'static) -> Self {
        self.session_backend = Some(Arc::new(backend));
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let handler = self.handler.ok_or(ServerBuildError::MissingHandler)?;
        let session_backend = self
            .session_backend
            .unwrap_or_else(|| Arc::new(FileSessionBackend::new(self.config.session_directory.clone())));
        Ok(Server { config: self.config, handler, session_backend, shutdown: CancellationToken::new() })
    }
}

pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    session_backend: Arc<dyn SessionBackend>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// A token that stops the accept loop when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Installs a default log subscriber, binds the configured address and serves until shutdown.
    pub async fn start(self) -> Result<(), ServerError> {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("global subscriber already installed");
        }

        let address = self.config.bind_address();
        let listener =
            TcpListener::bind(&address).await.map_err(|source| ServerError::Bind { address: address.clone(), source })?;
        self.serve(listener).await;
        Ok(())
    }

    /// Serves connections from an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(address) => info!(%address, "start listening"),
            Err(e) => warn!(cause = %e, "listener has no local address"),
        }

        let pipeline = Arc::new(Pipeline::new(
            self.config.clone(),
            self.handler,
            self.session_backend,
            self.shutdown.clone(),
        ));
        let sweeper = spawn_sweeper(&pipeline, Duration::from_secs(self.config.rate_limit_sweep_secs.max(1)));

        loop {
            let (tcp_stream, remote_addr) = tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                match pipeline.serve(reader, writer, remote_addr.ip()).await {
                    Ok(Outcome::Served(status)) => debug!(%remote_addr, %status, "request served"),
                    Ok(outcome) => debug!(%remote_addr, ?outcome, "connection closed without response"),
                    Err(e) => error!(%remote_addr, cause = %e, "connection failed"),
                }
            });
        }

        sweeper.abort();
        info!("server stopped");
    }
}

fn spawn_sweeper(pipeline: &Arc<Pipeline>, period: Duration) -> tokio::task::JoinHandle<()> {
    let limiter = Arc::clone(pipeline.limiter());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = limiter.sweep(Instant::now());
            if evicted > 0 {
                debug!(evicted, remaining = limiter.tracked(), "rate limit entries swept");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, HandlerError};
    use crate::request::Request;
    use crate::response::Response;
    use crate::session::MemorySessionBackend;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_server() -> Server {
        Server::builder()
            .config(ServerConfig { host: "127.0.0.1".into(), port: 0, ..ServerConfig::default() })
            .session_backend(MemorySessionBackend::new())
            .handler(handler_fn(|request: Request| async move {
                let response = match request.endpoint() {
                    "/stop" => Response::from("stopping").stop_server(),
                    _ => Response::from(format!("hello {}", request.client_address())),
                };
                Ok::<_, HandlerError>(response)
            }))
            .build()
            .unwrap()
    }

    async fn send(address: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes()).await.unwrap();
        let mut received = String::new();
        stream.read_to_string(&mut received).await.unwrap();
        received
    }

    #[test]
    fn build_requires_handler() {
        assert!(matches!(Server::builder().build(), Err(ServerBuildError::MissingHandler)));
    }

    #[test]
    fn debug_reports_handler_presence() {
        assert!(format!("{:?}", Server::builder()).contains("has_handler: false"));

        let builder = Server::builder().handler(handler_fn(|_: Request| async { Ok::<_, HandlerError>(Response::new()) }));
        assert!(format!("{builder:?}").contains("has_handler: true"));
    }

    #[tokio::test]
    async fn serves_until_handler_stops_it() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = test_server();
        let shutdown = server.shutdown_handle();
        let serving = tokio::spawn(server.serve(listener));

        let received = send(address, "/").await;
        assert!(received.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(received.ends_with("hello 127.0.0.1"));

        let received = send(address, "/stop").await;
        assert!(received.ends_with("stopping"));

        tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn external_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = test_server();
        let shutdown = server.shutdown_handle();
        let serving = tokio::spawn(server.serve(listener));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn start_reports_bind_failure() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let server = Server::builder()
            .config(ServerConfig { host: "127.0.0.1".into(), port, ..ServerConfig::default() })
            .handler(handler_fn(|_: Request| async { Ok::<_, HandlerError>(Response::new()) }))
            .build()
            .unwrap();

        assert!(matches!(server.start().await, Err(ServerError::Bind { .. })));
    }
}
