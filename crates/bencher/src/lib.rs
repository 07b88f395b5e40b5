//! Inputs shared by the benchmarks.

/// One benchmark input, embedded at compile time.
#[derive(Debug, Copy, Clone)]
pub struct Fixture {
    name: &'static str,
    content: &'static str,
}

impl Fixture {
    pub const fn new(name: &'static str, content: &'static str) -> Self {
        Self { name, content }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn content(&self) -> &'static str {
        self.content
    }

    pub fn bytes(&self) -> u64 {
        self.content.len() as u64
    }
}

pub static GET_SMALL: Fixture = Fixture::new("get_small", include_str!("../resources/request/get_small.txt"));
pub static GET_LARGE: Fixture = Fixture::new("get_large", include_str!("../resources/request/get_large.txt"));
pub static POST_CHUNKED: Fixture = Fixture::new("post_chunked", include_str!("../resources/request/post_chunked.txt"));

pub static URLENCODED_FORM: Fixture = Fixture::new("urlencoded", include_str!("../resources/form/urlencoded.txt"));
pub static MULTIPART_FORM: Fixture = Fixture::new("multipart", include_str!("../resources/form/multipart.txt"));

/// Boundary used by [`MULTIPART_FORM`].
pub const MULTIPART_BOUNDARY: &str = "XyZ";
