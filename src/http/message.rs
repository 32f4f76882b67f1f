//! Request and response messages.

use super::method::{Method, StatusCode, Version};
use super::uri::Uri;
use std::collections::BTreeMap;

pub const CONTENT_LENGTH: &str = "Content-Length";

/// Header map with case-insensitive keys.
///
/// The spelling of the most recent `set` is kept for output. Iteration is
/// ordered by key, which keeps encoded messages deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header. Surrounding whitespace is stripped.
    pub fn set(&mut self, key: &str, value: &str) {
        self.remove(key);
        self.entries
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.trim();
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let key = key.trim();
        let existing = self
            .entries
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .cloned()?;
        self.entries.remove(&existing)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: Headers,
    content: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::Http11,
            headers: Headers::new(),
            content: Vec::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.set(key, value);
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the body and update `Content-Length` to match.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
        self.headers
            .set(CONTENT_LENGTH, &self.content.len().to_string());
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }
}

/// A response produced by a handler or by the pipeline itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: Headers,
    content: Vec<u8>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::Http11,
            headers: Headers::new(),
            content: Vec::new(),
        }
    }

    /// Response with a `text/plain` diagnostic body.
    pub fn text(status: StatusCode, message: &str) -> Self {
        let mut response = Self::new(status);
        response.set_header("Content-Type", "text/plain");
        response.set_content(message);
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.set(key, value);
    }

    pub fn remove_header(&mut self, key: &str) {
        self.headers.remove(key);
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Replace the body and update `Content-Length` to match.
    pub fn set_content(&mut self, content: impl Into<Vec<u8>>) {
        self.content = content.into();
        self.headers
            .set(CONTENT_LENGTH, &self.content.len().to_string());
    }

    pub fn clear_content(&mut self) {
        self.set_content(Vec::new());
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }
}
