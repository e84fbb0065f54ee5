//! Data types for captured HTTP request and response information.
//!
//! This module contains the immutable snapshots handed to a [`Sink`](crate::Sink):
//! [`CapturedRequest`], [`CapturedResponse`], their [`CapturedBody`] and the
//! case-insensitive, order-preserving [`HttpHeaders`] map.

use axum::extract::ConnectInfo;
use axum::http::{request, response, HeaderMap, Method, StatusCode, Uri, Version};
use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;

/// Why a body was not captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Capture was disabled for this message before any bytes were read.
    NotCapturable,
    /// The body belongs to an earlier dispatch pass and cannot be read again.
    AlreadyConsumed,
    /// The underlying stream failed while it was being captured.
    Error,
    /// The stream was dropped before it produced a single byte.
    Aborted,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotCapturable => "not capturable",
            SkipReason::AlreadyConsumed => "already consumed",
            SkipReason::Error => "error",
            SkipReason::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body representation of a captured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedBody {
    /// The complete body.
    Captured(Bytes),
    /// The body was intentionally not captured.
    Skipped(SkipReason),
    /// The leading bytes of a body that exceeded the capture limit.
    Truncated {
        /// The first `limit` bytes of the body
        bytes: Bytes,
        /// Length of the body as it was sent
        original_length: u64,
    },
}

impl CapturedBody {
    /// Rendering used for skipped bodies by [`CapturedBody::as_string`].
    pub const SKIPPED: &'static str = "<skipped>";

    pub fn empty() -> Self {
        CapturedBody::Captured(Bytes::new())
    }

    /// Captured bytes, if any were kept.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            CapturedBody::Captured(bytes) | CapturedBody::Truncated { bytes, .. } => Some(bytes),
            CapturedBody::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CapturedBody::Skipped(_))
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self, CapturedBody::Truncated { .. })
    }

    /// Body as lossy UTF-8; skipped bodies render as `<skipped>`.
    pub fn as_string(&self) -> Cow<'_, str> {
        match self.bytes() {
            Some(bytes) => String::from_utf8_lossy(bytes),
            None => Cow::Borrowed(Self::SKIPPED),
        }
    }
}

/// Header map with ordered, case-insensitive names.
///
/// Names keep the order in which they were first seen and every name keeps its
/// values in encounter order. Lookups ignore ASCII case, and appending under a
/// name that only differs in case joins the existing entry.
///
/// ```rust
/// use logbook::HttpHeaders;
///
/// let mut headers = HttpHeaders::new();
/// headers.append("Accept", "text/plain");
/// headers.append("accept", "application/json");
///
/// assert_eq!(headers.get("ACCEPT"), Some("text/plain"));
/// assert_eq!(headers.get_all("Accept"), ["text/plain", "application/json"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Append a value, joining an existing entry with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// All values for `name`, in encounter order.
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(index) => &self.entries[index].1,
            None => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes every value stored under `name`.
    pub fn remove(&mut self, name: &str) -> Vec<String> {
        match self.position(name) {
            Some(index) => self.entries.remove(index).1,
            None => Vec::new(),
        }
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = HttpHeaders::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Convert an `http` header map, keeping raw values as lossy UTF-8.
impl From<&HeaderMap> for HttpHeaders {
    fn from(headers: &HeaderMap) -> Self {
        let mut result = HttpHeaders::new();
        for name in headers.keys() {
            for value in headers.get_all(name) {
                result.append(
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                );
            }
        }
        result
    }
}

impl Serialize for HttpHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HttpHeaders {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Values {
            One(String),
            Many(Vec<String>),
        }

        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = HttpHeaders;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of header names to a value or list of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut headers = HttpHeaders::new();
                while let Some((name, values)) = access.next_entry::<String, Values>()? {
                    match values {
                        Values::One(value) => headers.append(name, value),
                        Values::Many(values) => {
                            for value in values {
                                headers.append(name.as_str(), value);
                            }
                        }
                    }
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Immutable snapshot of an HTTP request.
///
/// Built by the middleware from the request head plus the captured body, and
/// handed to the [`Sink`](crate::Sink) for the pre-correlation write.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    remote: Option<SocketAddr>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HttpHeaders,
    body: CapturedBody,
}

impl CapturedRequest {
    pub fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HttpHeaders,
        body: CapturedBody,
    ) -> Self {
        Self {
            remote: None,
            method,
            uri,
            version,
            headers,
            body,
        }
    }

    /// Snapshot a request head. The remote address is taken from axum's
    /// [`ConnectInfo`] extension when the server provides it.
    pub fn from_parts(parts: &request::Parts, body: CapturedBody) -> Self {
        let remote = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Self {
            remote,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: HttpHeaders::from(&parts.headers),
            body,
        }
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> &CapturedBody {
        &self.body
    }

    pub fn with_remote(self, remote: SocketAddr) -> Self {
        Self {
            remote: Some(remote),
            ..self
        }
    }

    pub fn with_headers(self, headers: HttpHeaders) -> Self {
        Self { headers, ..self }
    }

    pub fn with_body(self, body: CapturedBody) -> Self {
        Self { body, ..self }
    }
}

/// Immutable snapshot of an HTTP response, handed to the
/// [`Sink`](crate::Sink) for the correlation write.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    version: Version,
    status: StatusCode,
    headers: HttpHeaders,
    body: CapturedBody,
}

impl CapturedResponse {
    pub fn new(
        version: Version,
        status: StatusCode,
        headers: HttpHeaders,
        body: CapturedBody,
    ) -> Self {
        Self {
            version,
            status,
            headers,
            body,
        }
    }

    pub fn from_parts(parts: &response::Parts, body: CapturedBody) -> Self {
        Self::new(
            parts.version,
            parts.status,
            HttpHeaders::from(&parts.headers),
            body,
        )
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> &CapturedBody {
        &self.body
    }

    pub fn with_headers(self, headers: HttpHeaders) -> Self {
        Self { headers, ..self }
    }

    pub fn with_body(self, body: CapturedBody) -> Self {
        Self { body, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    #[test]
    fn test_headers_lookup_ignores_case() {
        let headers: HttpHeaders = [("Content-Type", "text/plain"), ("X-Trace", "a")]
            .into_iter()
            .collect();

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("x-trace"));
        assert!(!headers.contains("x-missing"));
        assert!(headers.get_all("x-missing").is_empty());
    }

    #[test]
    fn test_headers_keep_encounter_order() {
        let mut headers = HttpHeaders::new();
        headers.append("B", "1");
        headers.append("a", "2");
        headers.append("b", "3");

        let names: Vec<_> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["B", "a"]);
        assert_eq!(headers.get_all("B"), ["1", "3"]);
        assert_eq!(headers.len(), 2);

        assert_eq!(headers.remove("b"), ["1", "3"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_headers_from_header_map() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", HeaderValue::from_static("a=1"));
        map.append("set-cookie", HeaderValue::from_static("b=2"));
        map.insert("content-length", HeaderValue::from_static("5"));

        let headers = HttpHeaders::from(&map);
        assert_eq!(headers.get_all("Set-Cookie"), ["a=1", "b=2"]);
        assert_eq!(headers.get("content-length"), Some("5"));
    }

    #[test]
    fn test_headers_deserialize_preserves_order() {
        let json = r#"{"Zeta":["1","2"],"alpha":"3","ZETA":["4"]}"#;
        let headers: HttpHeaders = serde_json::from_str(json).unwrap();

        let names: Vec<_> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["Zeta", "alpha"]);
        assert_eq!(headers.get_all("zeta"), ["1", "2", "4"]);
        assert_eq!(headers.get("Alpha"), Some("3"));
        assert_eq!(
            serde_json::to_string(&headers).unwrap(),
            r#"{"Zeta":["1","2","4"],"alpha":["3"]}"#
        );
    }

    #[test]
    fn test_body_as_string() {
        assert_eq!(CapturedBody::Captured(Bytes::from("hi")).as_string(), "hi");
        assert_eq!(
            CapturedBody::Skipped(SkipReason::AlreadyConsumed).as_string(),
            "<skipped>"
        );
        let truncated = CapturedBody::Truncated {
            bytes: Bytes::from("abc"),
            original_length: 10,
        };
        assert_eq!(truncated.as_string(), "abc");
        assert!(truncated.is_truncated());
        assert_eq!(SkipReason::NotCapturable.to_string(), "not capturable");
    }

    #[test]
    fn test_request_from_parts() {
        let (mut parts, _) = Request::post("/orders?id=7")
            .header("Content-Type", "application/json")
            .body(())
            .unwrap()
            .into_parts();
        parts
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 8080))));

        let request = CapturedRequest::from_parts(&parts, CapturedBody::empty());
        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.uri().query(), Some("id=7"));
        assert_eq!(request.version(), Version::HTTP_11);
        assert_eq!(request.headers().get("content-type"), Some("application/json"));
        assert_eq!(request.remote(), Some(SocketAddr::from(([127, 0, 0, 1], 8080))));
    }
}
