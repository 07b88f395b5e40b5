//! Server configuration.
//!
//! All configuration is built once, before the server starts, and then shared
//! read-only between the acceptor and the sessions through `Arc`s. Nothing in
//! here is mutated after [`Server::start`](crate::server::Server::start).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mime::Mime;

/// Read timeout applied to every socket read of a session.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound of the request line plus all header lines.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Upper bound of header lines per request.
pub const DEFAULT_MAX_HEADERS: usize = 64;

/// Upper bound of a request body, regardless of its transfer coding.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 10 * 1024 * 1024;

/// Multipart file parts larger than this are written to a temp file.
pub const DEFAULT_SPILL_THRESHOLD: usize = 1024;

/// Limits and buffer sizes of a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    max_header_bytes: usize,
    max_headers: usize,
    max_body_size: u64,
    spill_threshold: usize,
    read_buffer_size: usize,
    write_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_headers: DEFAULT_MAX_HEADERS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            read_buffer_size: 8 * 1024,
            write_buffer_size: 8 * 1024,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    #[must_use]
    pub fn with_max_headers(mut self, max_headers: usize) -> Self {
        self.max_headers = max_headers;
        self
    }

    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: u64) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    #[must_use]
    pub fn with_spill_threshold(mut self, spill_threshold: usize) -> Self {
        self.spill_threshold = spill_threshold;
        self
    }

    #[must_use]
    pub fn with_read_buffer_size(mut self, read_buffer_size: usize) -> Self {
        self.read_buffer_size = read_buffer_size;
        self
    }

    #[must_use]
    pub fn with_write_buffer_size(mut self, write_buffer_size: usize) -> Self {
        self.write_buffer_size = write_buffer_size;
        self
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    pub fn max_headers(&self) -> usize {
        self.max_headers
    }

    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    pub fn spill_threshold(&self) -> usize {
        self.spill_threshold
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn write_buffer_size(&self) -> usize {
        self.write_buffer_size
    }
}

/// Sizing of the worker pool.
///
/// `core_threads` OS threads drive the sessions, at most `max_sessions`
/// sessions run at the same time and every further accepted connection waits
/// in an unbounded backlog until a running session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    core_threads: usize,
    max_sessions: usize,
    idle_timeout: Duration,
    thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_threads: 3,
            max_sessions: 40,
            idle_timeout: Duration::from_secs(5),
            thread_name: "nano-http-worker".to_owned(),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads, at least one is always used.
    #[must_use]
    pub fn with_core_threads(mut self, core_threads: usize) -> Self {
        self.core_threads = core_threads.max(1);
        self
    }

    /// Sets the maximum number of concurrently running sessions, at least one.
    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn core_threads(&self) -> usize {
        self.core_threads
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

/// File extension to MIME type table.
///
/// The table is filled once when the server is built and is then only read.
/// Lookups are case-insensitive on the extension and fall back to
/// `application/octet-stream`.
#[derive(Debug, Clone)]
pub struct MimeTypes {
    by_extension: HashMap<String, Mime>,
}

impl Default for MimeTypes {
    fn default() -> Self {
        let entries = [
            ("html", mime::TEXT_HTML),
            ("htm", mime::TEXT_HTML),
            ("txt", mime::TEXT_PLAIN),
            ("text", mime::TEXT_PLAIN),
            ("css", mime::TEXT_CSS),
            ("csv", mime::TEXT_CSV),
            ("xml", mime::TEXT_XML),
            ("js", mime::APPLICATION_JAVASCRIPT),
            ("json", mime::APPLICATION_JSON),
            ("pdf", mime::APPLICATION_PDF),
            ("png", mime::IMAGE_PNG),
            ("jpg", mime::IMAGE_JPEG),
            ("jpeg", mime::IMAGE_JPEG),
            ("gif", mime::IMAGE_GIF),
            ("bmp", mime::IMAGE_BMP),
            ("svg", mime::IMAGE_SVG),
            ("woff", mime::FONT_WOFF),
            ("woff2", mime::FONT_WOFF2),
        ];

        let by_extension = entries.into_iter().map(|(ext, mime)| (ext.to_owned(), mime)).collect();
        Self { by_extension }
    }
}

impl MimeTypes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty table, every lookup yields `application/octet-stream`.
    #[must_use]
    pub fn empty() -> Self {
        Self { by_extension: HashMap::new() }
    }

    /// Adds or replaces the MIME type of `extension` (given without the dot).
    #[must_use]
    pub fn with(mut self, extension: &str, mime: Mime) -> Self {
        self.by_extension.insert(extension.trim_start_matches('.').to_ascii_lowercase(), mime);
        self
    }

    pub fn get(&self, extension: &str) -> Option<&Mime> {
        self.by_extension.get(&extension.to_ascii_lowercase())
    }

    /// Resolves the MIME type of `path` from its extension.
    pub fn lookup(&self, path: impl AsRef<Path>) -> Mime {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.get(ext))
            .cloned()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM)
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }
}

/// Everything a server needs besides its socket factory and handlers.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    session: SessionConfig,
    pool: PoolConfig,
    mime_types: Arc<MimeTypes>,
}

impl ServerConfig {
    pub fn new(session: SessionConfig, pool: PoolConfig, mime_types: MimeTypes) -> Self {
        Self { session, pool, mime_types: Arc::new(mime_types) }
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub fn mime_types(&self) -> &Arc<MimeTypes> {
        &self.mime_types
    }
}
