use std::fmt;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::{Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, trace};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::protocol::{ParseError, RawRequest, RequestFrame, RequestHeader, SendError};

/// An HTTP connection serving exactly one request.
///
/// `HttpConnection` reads one request, writes one response and then shuts the write half
/// down. The head can be read on its own so the caller may refuse a request before its
/// body is buffered. It performs no interpretation of the request beyond framing.
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

impl<R, W> fmt::Debug for HttpConnection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("decoder", self.framed_read.decoder())
            .field("buffered", &self.framed_read.read_buffer().len())
            .finish_non_exhaustive()
    }
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, max_body_size: u64) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(max_body_size), 8 * 1024),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    /// Reads the request head, leaving the body unread.
    ///
    /// Returns `Ok(None)` when the peer closed the connection without sending anything.
    pub async fn read_head(&mut self) -> Result<Option<RequestHeader>, ParseError> {
        match self.next_frame().await? {
            Some(RequestFrame::Head { header, body_len }) => {
                trace!(uri = %header.uri(), body_len, "received request head");
                Ok(Some(header))
            }
            Some(RequestFrame::Complete(_)) => Err(ParseError::UnexpectedFrame),
            None => Ok(None),
        }
    }

    /// Reads the body announced by the head returned from [`read_head`](Self::read_head).
    ///
    /// The body size limit is enforced here, before any body byte is buffered.
    pub async fn read_body(&mut self) -> Result<RawRequest, ParseError> {
        match self.next_frame().await? {
            Some(RequestFrame::Complete(request)) => Ok(request),
            Some(RequestFrame::Head { .. }) => Err(ParseError::UnexpectedFrame),
            None => Err(ParseError::Incomplete),
        }
    }

    /// Reads the next complete request, head and body.
    ///
    /// Returns `Ok(None)` when the peer closed the connection without sending anything.
    pub async fn read_request(&mut self) -> Result<Option<RawRequest>, ParseError> {
        match self.read_head().await? {
            Some(_) => self.read_body().await.map(Some),
            None => Ok(None),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<RequestFrame>, ParseError> {
        match self.framed_read.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => {
                debug!(cause = %e, "can't receive request");
                Err(e)
            }
            None => Ok(None),
        }
    }

    /// Writes `response` and flushes the underlying IO.
    pub async fn send_response(&mut self, response: Response<Bytes>) -> Result<(), SendError> {
        self.framed_write.send(response).await
    }

    /// Answers a request that could not be framed, choosing the status from the parse error.
    pub async fn send_parse_error(&mut self, e: &ParseError) -> Result<(), SendError> {
        let status = match e {
            ParseError::TooLargeHeader { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ParseError::TooLargeBody { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ParseError::UnsupportedTransferEncoding { .. } => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::BAD_REQUEST,
        };
        self.send_response(build_error_response(status)).await
    }

    /// Shuts the write half down, signalling the end of the response to the peer.
    pub async fn shutdown(mut self) -> Result<(), SendError> {
        let writer = self.framed_write.get_mut();
        if let Err(e) = writer.shutdown().await {
            error!(cause = %e, "failed to shutdown connection");
            return Err(SendError::io(e));
        }
        Ok(())
    }
}

pub fn build_error_response(status_code: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status_code;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn read_then_respond() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi").await.unwrap();

        let mut connection = HttpConnection::new(server_read, server_write, 1024);
        let request = connection.read_request().await.unwrap().unwrap();
        assert_eq!(request.header().uri().path(), "/echo");
        assert_eq!(&request.body()[..], b"hi");

        connection.send_response(Response::new(Bytes::from_static(b"hi"))).await.unwrap();
        connection.shutdown().await.unwrap();

        let mut received = String::new();
        client_read.read_to_string(&mut received).await.unwrap();
        assert!(received.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(received.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn closed_before_request() {
        let (client, server) = duplex(64);
        drop(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut connection = HttpConnection::new(server_read, server_write, 1024);
        assert!(connection.read_request().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_body_gets_413() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n").await.unwrap();

        let mut connection = HttpConnection::new(server_read, server_write, 16);
        let header = connection.read_head().await.unwrap().unwrap();
        assert_eq!(header.uri().path(), "/");
        let e = connection.read_body().await.unwrap_err();
        connection.send_parse_error(&e).await.unwrap();
        connection.shutdown().await.unwrap();

        let mut received = String::new();
        client_read.read_to_string(&mut received).await.unwrap();
        assert!(received.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    }

    #[tokio::test]
    async fn head_is_available_before_the_body_arrives() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"POST /upload HTTP/1.1\r\nContent-Length: 4\r\n\r\n").await.unwrap();

        let mut connection = HttpConnection::new(server_read, server_write, 1024);
        let header = connection.read_head().await.unwrap().unwrap();
        assert_eq!(header.uri().path(), "/upload");

        client_write.write_all(b"data").await.unwrap();
        let request = connection.read_body().await.unwrap();
        assert_eq!(&request.body()[..], b"data");
    }

    #[tokio::test]
    async fn body_before_head_is_out_of_order() {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let mut connection = HttpConnection::new(server_read, server_write, 1024);
        assert!(matches!(connection.read_body().await, Err(ParseError::UnexpectedFrame)));
    }
}
