//! `multipart/form-data` bodies.
//!
//! A body is split into parts on the boundary taken from `Content-Type`:
//!
//! ```text
//! --boundary\r\n
//! Content-Disposition: form-data; name="title"\r\n
//! \r\n
//! hello\r\n
//! --boundary\r\n
//! Content-Disposition: form-data; name="upload"; filename="notes.txt"\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! file contents...\r\n
//! --boundary--\r\n
//! ```
//!
//! Plain parts become form fields. Parts with a `filename` become
//! [`UploadedFile`]s, kept in memory when small and written to a temp file
//! of the session otherwise.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memchr::memmem;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::protocol::Parameters;
use crate::temp_file::TempFileManager;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MultipartError {
    #[error("content type is not multipart/form-data")]
    NotMultipart,

    #[error("missing boundary parameter")]
    MissingBoundary,

    #[error("empty boundary parameter")]
    EmptyBoundary,

    #[error("unexpected end of multipart body")]
    UnexpectedEof,

    #[error("malformed multipart body: {detail}")]
    InvalidFormat { detail: &'static str },

    #[error("part without a name in Content-Disposition")]
    MissingName,
}

/// Extracts the boundary from `multipart/form-data; boundary=...`.
///
/// # Errors
///
/// Fails when the media type is not `multipart/form-data` or the boundary is missing or empty.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut params = content_type.split(';');
    let media_type = params.next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    for param in params {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("boundary") {
            let boundary = unquote(value);
            if boundary.is_empty() {
                return Err(MultipartError::EmptyBoundary);
            }
            return Ok(boundary.to_owned());
        }
    }

    Err(MultipartError::MissingBoundary)
}

/// One part of a multipart body, its data sliced out of the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl Part {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// Splits `body` into its parts.
///
/// # Errors
///
/// Fails on a missing opening boundary, a body that ends before the closing
/// boundary, or a part without a `name`.
pub fn parse(body: &Bytes, boundary: &str) -> Result<Vec<Part>, MultipartError> {
    let delimiter = format!("--{boundary}");
    let next_delimiter = format!("\r\n--{boundary}");
    let delimiter_finder = memmem::Finder::new(delimiter.as_bytes());
    let next_finder = memmem::Finder::new(next_delimiter.as_bytes());

    let mut pos = delimiter_finder.find(body).ok_or(MultipartError::UnexpectedEof)? + delimiter.len();
    let mut parts = Vec::new();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(if rest.len() < 2 {
                MultipartError::UnexpectedEof
            } else {
                MultipartError::InvalidFormat { detail: "expected CRLF after boundary" }
            });
        }
        pos += 2;

        let header_len = memmem::find(&body[pos..], b"\r\n\r\n").ok_or(MultipartError::UnexpectedEof)?;
        let (name, filename, content_type) = parse_part_headers(&body[pos..pos + header_len])?;
        pos += header_len + 4;

        let data_len = next_finder.find(&body[pos..]).ok_or(MultipartError::UnexpectedEof)?;
        let data = body.slice(pos..pos + data_len);
        pos += data_len + next_delimiter.len();

        trace!(name = %name, size = data.len(), "parsed multipart part");
        parts.push(Part { name, filename, content_type, data });
    }
}

fn parse_part_headers(block: &[u8]) -> Result<(String, Option<String>, Option<String>), MultipartError> {
    let text = String::from_utf8_lossy(block);
    let mut disposition = None;
    let mut content_type = None;

    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-disposition") {
            disposition = Some(parse_content_disposition(value)?);
        } else if name.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_owned());
        }
    }

    let (name, filename) = disposition.ok_or(MultipartError::MissingName)?;
    Ok((name, filename, content_type))
}

/// `form-data; name="field"; filename="file.txt"` to `(name, filename)`.
fn parse_content_disposition(value: &str) -> Result<(String, Option<String>), MultipartError> {
    let mut name = None;
    let mut filename = None;

    for param in value.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(unquote(value).to_owned()),
            "filename" => filename = Some(unquote(value).to_owned()),
            _ => {}
        }
    }

    Ok((name.ok_or(MultipartError::MissingName)?, filename))
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s)
}

/// Where the content of an uploaded file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Memory(Bytes),
    /// A temp file that is deleted once the request has been answered.
    Disk(PathBuf),
}

/// A file part of a multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    field: String,
    filename: String,
    content_type: Option<String>,
    size: u64,
    source: FileSource,
}

impl UploadedFile {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// The temp file path when the content was spilled to disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            FileSource::Memory(_) => None,
            FileSource::Disk(path) => Some(path),
        }
    }

    /// Reads the whole content, from memory or from the temp file.
    ///
    /// # Errors
    ///
    /// Fails when the temp file can no longer be read.
    pub async fn bytes(&self) -> io::Result<Bytes> {
        match &self.source {
            FileSource::Memory(bytes) => Ok(bytes.clone()),
            FileSource::Disk(path) => tokio::fs::read(path).await.map(Bytes::from),
        }
    }
}

/// Form fields and files of a multipart body.
///
/// A file field also appears in the form with its filename as value. A field
/// name used by several files is stored as `name`, `name2`, `name3`, ...
#[derive(Debug, Default)]
pub(crate) struct MultipartForm {
    pub(crate) fields: Parameters,
    pub(crate) files: HashMap<String, UploadedFile>,
}

impl MultipartForm {
    pub(crate) async fn collect(
        parts: Vec<Part>,
        temp_files: &mut dyn TempFileManager,
        spill_threshold: usize,
    ) -> io::Result<Self> {
        let mut form = Self::default();

        for part in parts {
            let Some(filename) = part.filename else {
                form.fields.append(part.name, String::from_utf8_lossy(&part.data));
                continue;
            };

            let size = part.data.len() as u64;
            let source = if part.data.len() > spill_threshold {
                let mut temp_file = temp_files.create().await?;
                temp_file.file_mut().write_all(&part.data).await?;
                temp_file.file_mut().flush().await?;
                trace!(field = %part.name, size, path = %temp_file.path().display(), "spilled upload to disk");
                FileSource::Disk(temp_file.into_parts().0)
            } else {
                FileSource::Memory(part.data)
            };

            form.fields.append(part.name.clone(), filename.clone());

            let key = unique_key(&form.files, &part.name);
            let file = UploadedFile { field: part.name, filename, content_type: part.content_type, size, source };
            form.files.insert(key, file);
        }

        Ok(form)
    }
}

fn unique_key(files: &HashMap<String, UploadedFile>, name: &str) -> String {
    if !files.contains_key(name) {
        return name.to_owned();
    }
    (2..).map(|n| format!("{name}{n}")).find(|key| !files.contains_key(key)).unwrap_or_else(|| name.to_owned())
}
