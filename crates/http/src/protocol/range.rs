//! Conditional and byte-range responses for files.
//!
//! A [`FileResource`] carries an ETag derived from the absolute path, the
//! modification time and the size of the file. [`evaluate`] decides between
//! `304`, `206`, `416` and a full `200` from the request headers:
//!
//! 1. `If-None-Match` equal to the ETag (or `*`) gives `304`, even when a
//!    `Range` is present.
//! 2. A `Range` whose `If-Range` is absent or equal to the ETag gives `206`
//!    when it starts inside the file, `416` when it starts at or past its end.
//! 3. Anything else is served in full.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use http::header::{ACCEPT_RANGES, CONTENT_RANGE, ETAG, IF_NONE_MATCH, IF_RANGE, RANGE};
use http::{HeaderMap, HeaderName, HeaderValue};
use mime::Mime;
use tokio::fs::File;
use tracing::debug;

use crate::config::MimeTypes;
use crate::protocol::{Response, StatusCode};

/// A single `Range: bytes=...` specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-end`
    FromTo { start: u64, end: u64 },
    /// `bytes=start-`
    From { start: u64 },
    /// `bytes=-length`, the last `length` bytes
    Suffix { length: u64 },
}

/// Parses a `Range` header value. Only the first range of a list is used.
///
/// Returns `None` for other units and malformed values, which are then ignored.
pub fn parse_range(value: &str) -> Option<RangeSpec> {
    let (unit, ranges) = value.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }

    let first = ranges.split(',').next()?.trim();
    let (start, end) = first.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        (true, false) => Some(RangeSpec::Suffix { length: end.parse().ok()? }),
        (false, true) => Some(RangeSpec::From { start: start.parse().ok()? }),
        (false, false) => Some(RangeSpec::FromTo { start: start.parse().ok()?, end: end.parse().ok()? }),
    }
}

/// A quoted ETag from the absolute path, modification time and size of a file.
pub fn etag(path: &Path, modified: SystemTime, length: u64) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    modified.duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default().hash(&mut hasher);
    length.hash(&mut hasher);
    format!("\"{:x}\"", hasher.finish())
}

/// What to answer for a file of `length` bytes with the given ETag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    NotModified,
    /// Bytes `start..=end`.
    Partial { start: u64, end: u64 },
    Unsatisfiable,
    Full,
}

/// Evaluates `If-None-Match`, `Range` and `If-Range` against a resource.
pub fn evaluate(headers: &HeaderMap, etag: &str, length: u64) -> RangeOutcome {
    let header = |name: HeaderName| headers.get(name).and_then(|value| value.to_str().ok());

    if header(IF_NONE_MATCH).is_some_and(|value| if_none_match(value, etag)) {
        return RangeOutcome::NotModified;
    }

    let Some(spec) = header(RANGE).and_then(parse_range) else {
        return RangeOutcome::Full;
    };

    if !header(IF_RANGE).is_none_or(|value| same_tag(value, etag)) {
        return RangeOutcome::Full;
    }

    let (start, end) = match spec {
        RangeSpec::FromTo { start, end } if end < start => return RangeOutcome::Full,
        RangeSpec::FromTo { start, end } => (start, end),
        RangeSpec::From { start } => (start, u64::MAX),
        RangeSpec::Suffix { length: 0 } => return RangeOutcome::Unsatisfiable,
        RangeSpec::Suffix { length: suffix } => (length.saturating_sub(suffix), u64::MAX),
    };

    if start >= length {
        return RangeOutcome::Unsatisfiable;
    }
    RangeOutcome::Partial { start, end: end.min(length - 1) }
}

fn if_none_match(value: &str, etag: &str) -> bool {
    value.trim() == "*" || value.split(',').any(|tag| same_tag(tag, etag))
}

/// Compares two entity tags ignoring a weak prefix and the quotes.
fn same_tag(a: &str, b: &str) -> bool {
    fn opaque(tag: &str) -> &str {
        let tag = tag.trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        tag.trim_matches('"')
    }
    opaque(a) == opaque(b)
}

/// A file served with ETag, conditional and range support.
#[derive(Debug, Clone)]
pub struct FileResource {
    path: PathBuf,
    length: u64,
    modified: SystemTime,
    etag: String,
    mime_type: Mime,
}

impl FileResource {
    /// Reads the metadata of the file at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file does not exist, is not a regular file or its
    /// metadata cannot be read.
    pub async fn open(path: impl AsRef<Path>, mime_types: &MimeTypes) -> io::Result<Self> {
        let path = tokio::fs::canonicalize(path).await?;
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{} is not a file", path.display())));
        }

        let length = metadata.len();
        let modified = metadata.modified()?;
        let etag = etag(&path, modified, length);
        let mime_type = mime_types.lookup(&path);

        Ok(Self { path, length, modified, etag, mime_type })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn mime_type(&self) -> &Mime {
        &self.mime_type
    }

    /// Builds the response for a request carrying `headers`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be opened for reading.
    pub async fn respond(&self, headers: &HeaderMap) -> io::Result<Response> {
        let outcome = evaluate(headers, &self.etag, self.length);
        debug!(path = %self.path.display(), ?outcome, "evaluated file request");

        let etag = HeaderValue::from_str(&self.etag).map_err(io::Error::other)?;
        let accept_ranges = HeaderValue::from_static("bytes");

        let response = match outcome {
            RangeOutcome::NotModified => Response::new(StatusCode::NotModified).with_header(ETAG, etag),
            RangeOutcome::Unsatisfiable => Response::new(StatusCode::RangeNotSatisfiable)
                .with_header(CONTENT_RANGE, format!("bytes */{}", self.length).parse().map_err(io::Error::other)?)
                .with_header(ACCEPT_RANGES, accept_ranges)
                .with_header(ETAG, etag),
            RangeOutcome::Partial { start, end } => {
                let file = File::open(&self.path).await?;
                let content_range = format!("bytes {start}-{end}/{}", self.length);
                Response::partial(StatusCode::PartialContent, self.mime_type.clone(), file, start, end, self.length)
                    .with_header(CONTENT_RANGE, content_range.parse().map_err(io::Error::other)?)
                    .with_header(ACCEPT_RANGES, accept_ranges)
                    .with_header(ETAG, etag)
            }
            RangeOutcome::Full => {
                let file = File::open(&self.path).await?;
                Response::from_reader(StatusCode::Ok, self.mime_type.clone(), file, self.length)
                    .with_header(ACCEPT_RANGES, accept_ranges)
                    .with_header(ETAG, etag)
            }
        };

        Ok(response)
    }
}
