use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::RANGE;
use nano_http::config::{PoolConfig, SessionConfig};
use nano_http::handler::{make_handler, make_interceptor};
use nano_http::protocol::{FileResource, Request, Response, StatusCode};
use nano_http::server::{Server, ServerBuilder, ServerError, ServerState};

/// A parsed response read off the wire.
#[derive(Debug)]
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn read_reply(reader: &mut BufReader<TcpStream>) -> io::Result<Reply> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let status = line
        .split(' ')
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| io::Error::other(format!("bad status line {line:?}")))?;

    let mut headers = Vec::new();
    loop {
        line.clear();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| io::Error::other(format!("bad header {line:?}")))?;
        headers.push((name.to_owned(), value.trim().to_owned()));
    }

    let mut reply = Reply { status, headers, body: Vec::new() };
    if status == 304 || status == 204 {
        return Ok(reply);
    }

    if reply.header("transfer-encoding") == Some("chunked") {
        loop {
            line.clear();
            reader.read_line(&mut line)?;
            let size = usize::from_str_radix(line.trim_end(), 16).map_err(io::Error::other)?;
            let mut chunk = vec![0u8; size + 2];
            reader.read_exact(&mut chunk)?;
            if size == 0 {
                break;
            }
            reply.body.extend_from_slice(&chunk[..size]);
        }
    } else if let Some(length) = reply.header("content-length") {
        let mut body = vec![0u8; length.parse().map_err(io::Error::other)?];
        reader.read_exact(&mut body)?;
        reply.body = body;
    }

    Ok(reply)
}

fn local() -> ServerBuilder {
    Server::builder().address(([127, 0, 0, 1], 0)).read_timeout(Duration::from_secs(2))
}

fn started(builder: ServerBuilder) -> (Server, SocketAddr) {
    let server = builder.build();
    server.start_timeout(Duration::from_secs(5)).unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

fn connect(addr: SocketAddr) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (stream, reader)
}

fn echo_path() -> impl nano_http::handler::Handler {
    make_handler(|request: &Request| {
        let text = format!("{} {}", request.method(), request.path());
        async move { Ok::<_, io::Error>(Response::text(StatusCode::Ok, text)) }
    })
}

#[test]
fn keep_alive_serves_sequential_requests() {
    let (_server, addr) = started(local().handler(echo_path()));
    let (mut stream, mut reader) = connect(addr);

    for i in 0..5 {
        write!(stream, "GET /item/{i} HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        let reply = read_reply(&mut reader).unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("connection"), Some("keep-alive"));
        assert!(reply.header("date").is_some());
        assert_eq!(reply.text(), format!("GET /item/{i}"));
    }

    write!(stream, "GET /last HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    let reply = read_reply(&mut reader).unwrap();
    assert_eq!(reply.header("connection"), Some("close"));

    let mut rest = Vec::new();
    assert_eq!(reader.read_to_end(&mut rest).unwrap(), 0);
}

#[test]
fn port_in_use_fails_start() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let server = local().address(taken.local_addr().unwrap()).build();

    let err = server.start_timeout(Duration::from_secs(5)).unwrap_err();
    assert!(matches!(err, ServerError::Start { .. }));
    assert!(!server.is_listening());
    assert!(server.start_error().is_some());
}

#[test]
fn stop_closes_connection_of_slow_client() {
    let (server, addr) = started(local().read_timeout(Duration::from_secs(60)).handler(echo_path()));
    let (mut stream, mut reader) = connect(addr);

    // half a request head, the session now waits for the rest
    stream.write_all(b"GET / HTTP/1.1\r\nHost: loc").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.active_connections() == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.active_connections(), 1);

    let started = Instant::now();
    server.stop_timeout(Duration::from_secs(3)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(server.state(), ServerState::Stopped);

    let mut buf = [0u8; 16];
    assert!(matches!(reader.read(&mut buf), Ok(0) | Err(_)));
    assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(500)).is_err());
}

#[test]
fn chunked_request_and_response() {
    let handler = make_handler(|request: &Request| {
        let mut body = request.body().to_vec();
        body.reverse();
        async move { Ok::<_, io::Error>(Response::chunked(StatusCode::Ok, mime::TEXT_PLAIN, io::Cursor::new(body))) }
    });
    let (_server, addr) = started(local().handler(handler));
    let (mut stream, mut reader) = connect(addr);

    let request = b"POST /reverse HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n";
    stream.write_all(request).unwrap();
    let reply = read_reply(&mut reader).unwrap();

    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("transfer-encoding"), Some("chunked"));
    assert_eq!(reply.text(), "fedcba");
}

#[test]
fn interceptors_and_handler_failures() {
    let auth = make_interceptor(|request: &Request| {
        let denied = request.path().starts_with("/private") && request.header().header("authorization").is_none();
        async move { Ok::<_, io::Error>(denied.then(|| Response::text(StatusCode::Unauthorized, "who are you?"))) }
    });
    let handler = make_handler(|request: &Request| {
        let fail = request.path() == "/boom";
        async move {
            assert!(!fail, "handler exploded");
            Ok::<_, io::Error>(Response::text(StatusCode::Ok, "fine"))
        }
    });
    let (_server, addr) = started(local().interceptor(auth).handler(handler));
    let (mut stream, mut reader) = connect(addr);

    stream.write_all(b"GET /private/data HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut reader).unwrap().status, 401);

    stream.write_all(b"GET /private/data HTTP/1.1\r\nAuthorization: token\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut reader).unwrap().status, 200);

    stream.write_all(b"GET /boom HTTP/1.1\r\n\r\n").unwrap();
    let reply = read_reply(&mut reader).unwrap();
    assert_eq!(reply.status, 500);
    assert_eq!(reply.text(), "500 Internal Server Error");

    // the connection survives a failed handler
    stream.write_all(b"GET /again HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut reader).unwrap().status, 200);
}

#[test]
fn default_handler_is_not_found() {
    let (_server, addr) = started(local());
    let (mut stream, mut reader) = connect(addr);

    stream.write_all(b"GET /missing HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut reader).unwrap().status, 404);
}

#[test]
fn oversized_body_is_rejected_and_closed() {
    let (_server, addr) = started(local().session(SessionConfig::new().with_max_body_size(8)).handler(echo_path()));
    let (mut stream, mut reader) = connect(addr);

    stream.write_all(b"POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n").unwrap();
    let reply = read_reply(&mut reader).unwrap();
    assert_eq!(reply.status, 413);
    assert_eq!(reply.header("connection"), Some("close"));
}

#[test]
fn file_ranges() {
    let dir = std::env::temp_dir().join(format!("nano-http-range-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("alphabet.txt");
    std::fs::write(&path, "abcdefghijklmnopqrstuvwxyz").unwrap();

    let file = Arc::new(path.clone());
    let handler = make_handler(move |request: &Request| {
        let path = Arc::clone(&file);
        let headers = request.headers().clone();
        let mime_types = request.mime_types().clone();
        async move { FileResource::open(path.as_path(), &mime_types).await?.respond(&headers).await }
    });
    let (_server, addr) = started(local().handler(handler));
    let (mut stream, mut reader) = connect(addr);

    stream.write_all(b"GET /a HTTP/1.1\r\n\r\n").unwrap();
    let full = read_reply(&mut reader).unwrap();
    assert_eq!(full.status, 200);
    assert_eq!(full.text(), "abcdefghijklmnopqrstuvwxyz");
    assert_eq!(full.header("accept-ranges"), Some("bytes"));
    assert_eq!(full.header("content-type"), Some("text/plain"));
    let etag = full.header("etag").unwrap().to_owned();

    write!(stream, "GET /a HTTP/1.1\r\n{RANGE}: bytes=2-5\r\n\r\n").unwrap();
    let partial = read_reply(&mut reader).unwrap();
    assert_eq!(partial.status, 206);
    assert_eq!(partial.header("content-range"), Some("bytes 2-5/26"));
    assert_eq!(partial.text(), "cdef");

    write!(stream, "GET /a HTTP/1.1\r\nRange: bytes=-3\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut reader).unwrap().text(), "xyz");

    write!(stream, "GET /a HTTP/1.1\r\nRange: bytes=100-\r\n\r\n").unwrap();
    let unsatisfiable = read_reply(&mut reader).unwrap();
    assert_eq!(unsatisfiable.status, 416);
    assert_eq!(unsatisfiable.header("content-range"), Some("bytes */26"));

    write!(stream, "GET /a HTTP/1.1\r\nIf-None-Match: {etag}\r\nRange: bytes=0-1\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut reader).unwrap().status, 304);

    write!(stream, "HEAD /a HTTP/1.1\r\n\r\n").unwrap();
    let head = read_reply_head_only(&mut reader);
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("content-length: 26\r\n"));

    std::fs::remove_dir_all(&dir).unwrap();
}

/// Reads a response head without consuming a body.
fn read_reply_head_only(reader: &mut BufReader<TcpStream>) -> String {
    let mut head = String::new();
    loop {
        let before = head.len();
        reader.read_line(&mut head).unwrap();
        if head[before..].trim_end().is_empty() {
            return head;
        }
    }
}

#[test]
fn multipart_upload_is_spilled_and_cleaned() {
    let handler = make_handler(|request: &Request| {
        let title = request.form().get("title").unwrap_or_default().to_owned();
        let upload = request.file("upload").cloned();
        async move {
            let upload = upload.ok_or_else(|| io::Error::other("missing upload"))?;
            let spilled = upload.path().map(|path| path.to_path_buf());
            let content = upload.bytes().await?;
            let content = String::from_utf8_lossy(&content);
            let text = format!("{title}|{}|{content}|{}", upload.filename(), spilled.is_some());

            let spilled_to = spilled.map(|p| p.display().to_string()).unwrap_or_default();
            let spilled_to = http::HeaderValue::from_str(&spilled_to).map_err(io::Error::other)?;
            Ok::<_, io::Error>(
                Response::text(StatusCode::Ok, text)
                    .with_header(http::header::HeaderName::from_static("x-spilled-to"), spilled_to),
            )
        }
    });
    let (_server, addr) = started(local().session(SessionConfig::new().with_spill_threshold(8)).handler(handler));
    let (mut stream, mut reader) = connect(addr);

    let body = "--B\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\
        \r\n\
        notes\r\n\
        --B\r\n\
        Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n\
        \r\n\
        more than eight bytes\r\n\
        --B--\r\n";
    write!(
        stream,
        "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=B\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .unwrap();

    let reply = read_reply(&mut reader).unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "notes|notes.txt|more than eight bytes|true");

    // the spill file is removed once the request has been answered
    let spilled = std::path::PathBuf::from(reply.header("x-spilled-to").unwrap());
    let deadline = Instant::now() + Duration::from_secs(5);
    while spilled.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(!spilled.exists());
}

#[test]
fn sessions_beyond_the_pool_wait_for_a_worker() {
    let pool = PoolConfig::new().with_core_threads(1).with_max_sessions(1);
    let (_server, addr) = started(local().pool(pool).handler(echo_path()));

    let (mut first, mut first_reader) = connect(addr);
    first.write_all(b"GET /first HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(read_reply(&mut first_reader).unwrap().status, 200);

    // the first session still holds the only worker while it stays open
    let (mut second, mut second_reader) = connect(addr);
    second.write_all(b"GET /second HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
    second_reader.get_ref().set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let mut peeked = [0u8; 1];
    let waited = second_reader.get_ref().peek(&mut peeked);
    assert!(waited.is_err());

    drop(first_reader);
    drop(first);

    second_reader.get_ref().set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let reply = read_reply(&mut second_reader).unwrap();
    assert_eq!(reply.text(), "GET /second");
}
