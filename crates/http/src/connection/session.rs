//! The per-connection protocol engine.
//!
//! A [`Session`] owns both halves of one connection and runs its whole
//! keep-alive lifetime: read a request head, read and decode the body, hand
//! the [`Request`] to the [`Dispatcher`], write the response, and start over
//! while the connection stays persistent.
//!
//! Every read is bounded by the read timeout. A timeout, EOF or I/O error ends
//! the session quietly; these are the normal ways a connection goes away.

use std::io::SeekFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, DATE};
use http::HeaderValue;
use mime::Mime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tokio_util::codec::Decoder;
use tracing::{debug, error, trace, warn};

use crate::codec::RequestDecoder;
use crate::config::{DEFAULT_READ_TIMEOUT, MimeTypes, ServerConfig, SessionConfig};
use crate::connection::MessageWriter;
use crate::handler::Dispatcher;
use crate::protocol::multipart::{self, MultipartForm};
use crate::protocol::{
    ConnectionClosed, HttpError, Message, Parameters, ParseError, PayloadItem, PayloadSize, Request, RequestHeader,
    Response, ResponseBody, ResponseHead, SendError, StatusCode, range_len,
};
use crate::temp_file::TempFileManager;

/// Response bodies read from a stream are written in pieces of this size.
const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// What every session of a server shares.
#[derive(Debug)]
pub struct SessionContext {
    config: SessionConfig,
    mime_types: Arc<MimeTypes>,
    dispatcher: Dispatcher,
    read_timeout: Duration,
}

impl SessionContext {
    pub fn new(config: &ServerConfig, dispatcher: Dispatcher, read_timeout: Duration) -> Self {
        Self {
            config: config.session().clone(),
            mime_types: Arc::clone(config.mime_types()),
            dispatcher,
            read_timeout,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(&ServerConfig::default(), Dispatcher::default(), DEFAULT_READ_TIMEOUT)
    }
}

/// Whether another request may follow on the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    KeepAlive,
    Close,
}

impl Flow {
    fn from_keep_alive(keep_alive: bool) -> Self {
        if keep_alive { Flow::KeepAlive } else { Flow::Close }
    }
}

/// One connection, driven by exactly one task.
pub struct Session<R, W> {
    reader: R,
    read_buf: BytesMut,
    writer: MessageWriter<W>,
    decoder: RequestDecoder,
    remote_addr: Option<SocketAddr>,
    temp_files: Box<dyn TempFileManager>,
    context: Arc<SessionContext>,
}

impl<R, W> std::fmt::Debug for Session<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("remote_addr", &self.remote_addr).finish_non_exhaustive()
    }
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        reader: R,
        writer: W,
        remote_addr: Option<SocketAddr>,
        temp_files: Box<dyn TempFileManager>,
        context: Arc<SessionContext>,
    ) -> Self {
        let config = context.config();
        Self {
            reader,
            read_buf: BytesMut::with_capacity(config.read_buffer_size()),
            writer: MessageWriter::with_capacity(writer, config.write_buffer_size()),
            decoder: RequestDecoder::new(config),
            remote_addr,
            temp_files,
            context,
        }
    }

    /// Serves requests until the connection closes.
    ///
    /// # Errors
    ///
    /// Only failures that are not an ordinary close are returned, such as a
    /// response body that could not be produced or ended short of its
    /// `Content-Length`. A failed write to the peer is an ordinary close. The
    /// connection is finished either way.
    pub async fn run(mut self) -> Result<(), HttpError> {
        let result = loop {
            let flow = self.execute().await;
            self.temp_files.clear().await;

            match flow {
                Ok(Flow::KeepAlive) => {}
                Ok(Flow::Close) => break Ok(()),
                Err(e) if e.is_closed() => {
                    debug!(remote_addr = ?self.remote_addr, cause = %e, "connection closed");
                    break Ok(());
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.writer.shutdown().await {
            trace!(remote_addr = ?self.remote_addr, cause = %e, "failed to shut down connection");
        }
        result
    }

    /// One request/response cycle.
    async fn execute(&mut self) -> Result<Flow, HttpError> {
        let (header, payload_size) = match self.next_message().await {
            Ok(Message::Header(head)) => head,
            Ok(Message::Payload(_)) => {
                return self.reject(&ParseError::invalid_body("body without a request head")).await;
            }
            Err(HttpError::RequestError { source }) => return self.reject(&source).await,
            Err(e) => return Err(e),
        };

        trace!(method = %header.method(), uri = %header.uri(), ?payload_size, "received request head");
        let keep_alive = header.keep_alive();
        let is_head = header.is_head();

        if !payload_size.is_empty() && header.expects_continue() {
            self.writer.write_continue();
            self.writer.flush().await?;
        }

        let mut request = match self.read_request(header).await {
            Ok(request) => request,
            Err(HttpError::RequestError { source }) => return self.reject(&source).await,
            Err(e) => return Err(e),
        };

        if let Err(e) = self.decode_body(&mut request).await {
            return match e {
                HttpError::RequestError { source: ParseError::Io { source } } => {
                    error!(remote_addr = ?self.remote_addr, cause = %source, "failed to store multipart upload");
                    let status = StatusCode::InternalServerError;
                    let response = Response::text(status.clone(), status.description());
                    self.write_response(response, is_head, keep_alive).await?;
                    Ok(Flow::from_keep_alive(keep_alive))
                }
                HttpError::RequestError { source } => self.reject(&source).await,
                e => Err(e),
            };
        }

        let response = self.context.dispatcher.dispatch(&request).await;
        let keep_alive = keep_alive && !response.close_connection();

        self.write_response(response, is_head, keep_alive).await?;
        Ok(Flow::from_keep_alive(keep_alive))
    }

    /// Reads the body of the current request and builds the [`Request`].
    async fn read_request(&mut self, header: RequestHeader) -> Result<Request, HttpError> {
        let mut body = BytesMut::new();
        loop {
            match self.next_message().await? {
                Message::Payload(PayloadItem::Chunk(bytes)) => body.extend_from_slice(&bytes),
                Message::Payload(PayloadItem::Eof) => break,
                Message::Header(_) => return Err(ParseError::invalid_body("request head inside a body").into()),
            }
        }

        let mut request = Request::new(header, self.remote_addr, Arc::clone(&self.context.mime_types))?;
        request.set_body(body.freeze());
        Ok(request)
    }

    /// Fills form fields and uploaded files from an urlencoded or multipart body.
    async fn decode_body(&mut self, request: &mut Request) -> Result<(), HttpError> {
        let Some(content_type) = request.content_type().and_then(|value| value.parse::<Mime>().ok()) else {
            return Ok(());
        };

        match content_type.essence_str() {
            essence if essence == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() => {
                let form = Parameters::parse(&String::from_utf8_lossy(request.body()));
                request.set_form(form);
            }
            essence if essence == mime::MULTIPART_FORM_DATA.essence_str() => {
                let boundary = multipart::parse_boundary(content_type.as_ref()).map_err(ParseError::from)?;
                let parts = multipart::parse(request.body(), &boundary).map_err(ParseError::from)?;

                let spill_threshold = self.context.config.spill_threshold();
                let form = MultipartForm::collect(parts, self.temp_files.as_mut(), spill_threshold)
                    .await
                    .map_err(ParseError::io)?;

                trace!(fields = form.fields.len(), files = form.files.len(), "decoded multipart body");
                request.set_form(form.fields);
                request.set_files(form.files);
                request.set_body(Bytes::new());
            }
            _ => {}
        }

        Ok(())
    }

    async fn next_message(&mut self) -> Result<Message<(RequestHeader, PayloadSize)>, HttpError> {
        loop {
            if let Some(message) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(message);
            }
            self.fill().await?;
        }
    }

    /// Reads more bytes into the read buffer, waiting at most the read timeout.
    async fn fill(&mut self) -> Result<(), ConnectionClosed> {
        if self.read_buf.capacity() - self.read_buf.len() < 1024 {
            self.read_buf.reserve(self.context.config.read_buffer_size());
        }

        let read_timeout = self.context.read_timeout;
        match tokio::time::timeout(read_timeout, self.reader.read_buf(&mut self.read_buf)).await {
            Ok(Ok(0)) => Err(ConnectionClosed::Eof),
            Ok(Ok(n)) => {
                trace!(read = n, "read from connection");
                Ok(())
            }
            Ok(Err(e)) => Err(ConnectionClosed::Io(e)),
            Err(_elapsed) => Err(ConnectionClosed::Timeout(read_timeout)),
        }
    }

    /// Answers a request that could not be read and ends the connection.
    async fn reject(&mut self, error: &ParseError) -> Result<Flow, HttpError> {
        let status = error.status();
        warn!(remote_addr = ?self.remote_addr, status = status.code(), cause = %error, "rejecting request");

        let response = Response::text(status.clone(), status.description());
        self.write_response(response, false, false).await?;
        Ok(Flow::Close)
    }

    async fn write_response(&mut self, response: Response, is_head: bool, keep_alive: bool) -> Result<(), HttpError> {
        let (mut head, body, _) = response.into_parts();

        if !head.contains(&DATE) {
            head.append(DATE, http_date()?);
        }
        head.insert(CONNECTION, HeaderValue::from_static(if keep_alive { "keep-alive" } else { "close" }));

        let bodiless = head.status().is_bodiless();
        let payload_size = body.payload_size();
        trace!(status = head.status().code(), ?payload_size, "writing response");

        self.writer.write(Message::<_, Bytes>::Header((head, payload_size)))?;
        if is_head || bodiless {
            self.writer.skip_payload();
            return Ok(self.writer.flush().await?);
        }

        match body {
            ResponseBody::Empty => {}
            ResponseBody::Bytes(bytes) if bytes.is_empty() => {}
            ResponseBody::Bytes(bytes) => self.write_chunk(bytes)?,
            ResponseBody::Stream { mut reader, length } => self.copy(&mut reader, length).await?,
            ResponseBody::Chunked(mut reader) => self.copy(&mut reader, u64::MAX).await?,
            ResponseBody::Partial { mut reader, start, end, .. } => {
                reader.seek(SeekFrom::Start(start)).await.map_err(SendError::io)?;
                self.copy(&mut reader, range_len(start, end)).await?;
            }
        }

        self.writer.write(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Eof))?;
        Ok(self.writer.flush().await?)
    }

    fn write_chunk(&mut self, bytes: Bytes) -> Result<(), SendError> {
        self.writer.write(Message::<(ResponseHead, PayloadSize), Bytes>::Payload(PayloadItem::Chunk(bytes)))
    }

    /// Streams at most `limit` bytes of `reader` into the response body.
    ///
    /// A read failure is a [`SendError`]; a write failure closes the connection.
    async fn copy<B>(&mut self, reader: &mut B, limit: u64) -> Result<(), HttpError>
    where
        B: AsyncRead + Unpin + ?Sized,
    {
        let mut remaining = limit;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];

        while remaining > 0 {
            let want = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
            let n = reader.read(&mut buf[..want]).await.map_err(SendError::io)?;
            if n == 0 {
                break;
            }

            remaining -= n as u64;
            self.write_chunk(Bytes::copy_from_slice(&buf[..n]))?;
            self.writer.flush().await?;
        }

        Ok(())
    }
}

/// The current time as an IMF-fixdate `Date` value.
fn http_date() -> Result<HeaderValue, SendError> {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    HeaderValue::from_maybe_shared(Bytes::from_owner(buf)).map_err(SendError::invalid_body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Handler, make_handler};
    use crate::temp_file::DefaultTempFileManager;
    use indoc::indoc;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, duplex};

    /// A peer that takes `budget` bytes and then resets the connection.
    struct ResetAfter {
        budget: usize,
    }

    impl AsyncWrite for ResetAfter {
        fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn echo() -> Arc<dyn Handler> {
        Arc::new(make_handler(|request: &Request| {
            let text = format!(
                "{} {} q={:?} form={:?} files={:?} body={}",
                request.method(),
                request.path(),
                request.query().get("q"),
                request.form().get("name"),
                request.files().keys().collect::<Vec<_>>(),
                String::from_utf8_lossy(request.body()),
            );
            async move { Ok::<_, io::Error>(Response::text(StatusCode::Ok, text)) }
        }))
    }

    fn context(handler: Arc<dyn Handler>, session: SessionConfig) -> Arc<SessionContext> {
        let config = ServerConfig::new(session, Default::default(), MimeTypes::default());
        Arc::new(SessionContext::new(&config, Dispatcher::new(Vec::new(), handler), Duration::from_millis(500)))
    }

    fn session<R, W>(reader: R, writer: W, context: Arc<SessionContext>) -> Session<R, W>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        Session::new(reader, writer, None, Box::new(DefaultTempFileManager::default()), context)
    }

    /// Feeds `input` to a session and collects everything it writes back, with how the session ended.
    async fn exchange_result(input: &str, context: Arc<SessionContext>) -> (String, Result<(), HttpError>) {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(session(server_read, server_write, context).run());

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        (output, task.await.unwrap())
    }

    async fn exchange(input: &str, context: Arc<SessionContext>) -> String {
        let (output, result) = exchange_result(input, context).await;
        result.unwrap();
        output
    }

    fn respond_with<F>(response: F) -> Arc<dyn Handler>
    where
        F: Fn() -> Response + Send + Sync + 'static,
    {
        let response = Arc::new(response);
        Arc::new(make_handler(move |_: &Request| {
            let response = Arc::clone(&response);
            async move { Ok::<_, io::Error>(response()) }
        }))
    }

    fn statuses(output: &str) -> Vec<&str> {
        output.lines().filter(|line| line.starts_with("HTTP/1.1 ")).collect()
    }

    #[tokio::test]
    async fn keep_alive_serves_every_request() {
        let input = "GET /a HTTP/1.1\r\nHost: x\r\n\r\n".repeat(3);
        let output = exchange(&input, context(echo(), SessionConfig::default())).await;

        assert_eq!(statuses(&output), ["HTTP/1.1 200 OK"; 3]);
        assert_eq!(output.matches("connection: keep-alive").count(), 3);
        assert_eq!(output.matches("date: ").count(), 3);
    }

    #[tokio::test]
    async fn connection_close_ends_the_session() {
        let input = "GET /a HTTP/1.1\r\nConnection: close\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let output = exchange(input, context(echo(), SessionConfig::default())).await;

        assert_eq!(statuses(&output).len(), 1);
        assert!(output.contains("connection: close"));
        assert!(output.contains("GET /a"));
    }

    #[tokio::test]
    async fn http_10_closes_by_default() {
        let input = "GET /a HTTP/1.0\r\n\r\nGET /b HTTP/1.0\r\n\r\n";
        let output = exchange(input, context(echo(), SessionConfig::default())).await;
        assert_eq!(statuses(&output).len(), 1);
    }

    #[tokio::test]
    async fn urlencoded_and_chunked_bodies() {
        let input = indoc! {"
            POST /form?q=%E7%8E%8B HTTP/1.1\r
            Content-Type: application/x-www-form-urlencoded\r
            Content-Length: 13\r
            \r
            name=foo+bar&POST /raw HTTP/1.1\r
            Transfer-Encoding: chunked\r
            \r
            3\r
            abc\r
            0\r
            \r
        "};
        let output = exchange(input, context(echo(), SessionConfig::default())).await;

        assert!(output.contains("POST /form q=Some(\"王\") form=Some(\"foo bar\")"));
        assert!(output.contains("POST /raw q=None form=None files=[] body=abc"));
    }

    #[tokio::test]
    async fn multipart_fields_and_files() {
        let body = "--XyZ\r\n\
            Content-Disposition: form-data; name=\"name\"\r\n\
            \r\n\
            alice\r\n\
            --XyZ\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            file content\r\n\
            --XyZ--\r\n";
        let input = format!(
            "POST /upload HTTP/1.1\r\n\
            Content-Type: multipart/form-data; boundary=XyZ\r\n\
            Content-Length: {}\r\n\r\n{body}",
            body.len()
        );

        let session = SessionConfig::default().with_spill_threshold(4);
        let output = exchange(&input, context(echo(), session)).await;
        assert!(output.contains("form=Some(\"alice\") files=[\"upload\"] body="));
    }

    #[tokio::test]
    async fn head_gets_no_body() {
        let output = exchange("HEAD /a HTTP/1.1\r\n\r\n", context(echo(), SessionConfig::default())).await;
        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(output.contains("content-length: "));
        assert!(output.ends_with("\r\n\r\n"));
        assert!(!output.contains("HEAD /a"));
    }

    #[tokio::test]
    async fn expect_continue_is_answered() {
        let input = "POST /a HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nhi";
        let output = exchange(input, context(echo(), SessionConfig::default())).await;
        assert!(output.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected() {
        let output = exchange("GARBAGE\r\n\r\n", context(echo(), SessionConfig::default())).await;
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(output.contains("connection: close"));

        let output = exchange("GET / HTTP/2.0\r\n\r\n", context(echo(), SessionConfig::default())).await;
        assert!(output.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"));

        let session = SessionConfig::default().with_max_body_size(4);
        let input = "POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789";
        let output = exchange(input, context(echo(), session)).await;
        assert!(output.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));

        let long = format!("GET / HTTP/1.1\r\nX-Long: {}\r\n\r\n", "a".repeat(200));
        let session = SessionConfig::default().with_max_header_bytes(128);
        let output = exchange(&long, context(echo(), session)).await;
        assert!(output.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    }

    #[tokio::test]
    async fn chunked_response_body() {
        let handler = respond_with(|| {
            Response::chunked(StatusCode::Ok, mime::TEXT_PLAIN, io::Cursor::new(b"streamed".to_vec()))
        });
        let input = "GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let output = exchange(input, context(handler, SessionConfig::default())).await;

        assert!(output.contains("transfer-encoding: chunked\r\n"));
        assert!(output.ends_with("\r\n\r\n8\r\nstreamed\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn partial_response_body() {
        let handler = respond_with(|| {
            let source = io::Cursor::new(b"0123456789".to_vec());
            Response::partial(StatusCode::PartialContent, mime::TEXT_PLAIN, source, 2, 5, 10)
        });
        let input = "GET / HTTP/1.1\r\nConnection: close\r\n\r\n";
        let output = exchange(input, context(handler, SessionConfig::default())).await;

        assert!(output.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(output.contains("content-length: 4\r\n"));
        assert!(output.ends_with("\r\n\r\n2345"));
    }

    #[tokio::test]
    async fn stream_ending_before_its_length_closes_the_connection() {
        let handler = respond_with(|| Response::from_reader(StatusCode::Ok, mime::TEXT_PLAIN, &b"0123"[..], 10));
        let input = "GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let (output, result) = exchange_result(input, context(handler, SessionConfig::default())).await;

        assert_eq!(statuses(&output).len(), 1);
        assert!(output.contains("content-length: 10\r\n"));
        assert!(output.ends_with("\r\n\r\n0123"));
        assert!(matches!(result, Err(HttpError::ResponseError { source: SendError::InvalidBody { .. } })));
    }

    #[tokio::test]
    async fn peer_reset_while_writing_is_an_ordinary_close() {
        let input = &b"GET / HTTP/1.1\r\n\r\n"[..];
        let result = session(input, ResetAfter { budget: 0 }, context(echo(), SessionConfig::default())).run().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn peer_reset_in_the_middle_of_a_stream_is_an_ordinary_close() {
        let handler = respond_with(|| {
            let body = io::Cursor::new(vec![b'x'; 4 * STREAM_CHUNK_SIZE]);
            Response::from_reader(StatusCode::Ok, mime::TEXT_PLAIN, body, 4 * STREAM_CHUNK_SIZE as u64)
        });
        let input = &b"GET / HTTP/1.1\r\n\r\n"[..];
        let writer = ResetAfter { budget: STREAM_CHUNK_SIZE };

        let result = session(input, writer, context(handler, SessionConfig::default())).run().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let (client, server) = duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let session = session(server_read, server_write, context(echo(), SessionConfig::default()));

        let started = std::time::Instant::now();
        session.run().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
        drop(client);
    }
}
