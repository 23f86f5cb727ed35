//! Request capture.
//!
//! # Responsibilities
//! - Snapshot the inbound request (method, path, query, headers, body)
//! - Carry the request id assigned by the request-id layer
//! - Answer the introspection commands scripts run against it
//!
//! # Design Decisions
//! - The body is read fully before dispatch (bounded by the body limit)
//!   so scripts can read it synchronously
//! - Query values are decoded once, first occurrence wins on lookup
//! - The path is percent-decoded before routing, so patterns and `param`
//!   see `/hello/Ada Lovelace`, not `/hello/Ada%20Lovelace`

use axum::body::Bytes;
use axum::http::{request::Parts, HeaderMap, HeaderName, Method};
use percent_encoding::percent_decode_str;

/// Header carrying the request id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Percent-decode a request path. Invalid UTF-8 is replaced, not rejected.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Everything a script may ask about the request that started it.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestData {
    /// Capture the parts of an axum request together with its buffered body.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method: parts.method.to_string(),
            path: decode_path(parts.uri.path()),
            query,
            headers: parts.headers.clone(),
            body,
        }
    }

    /// Build a request by hand; used by tests and internal callers.
    pub fn new(method: Method, target: &str, body: impl Into<Bytes>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (
                path,
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect(),
            ),
            None => (target, Vec::new()),
        };

        Self {
            method: method.to_string(),
            path: decode_path(path),
            query,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// First value of a query parameter, if present.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// A request header as text; missing or non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The id assigned by the request-id middleware.
    pub fn request_id(&self) -> Option<&str> {
        self.header(X_REQUEST_ID.as_str())
    }

    /// The raw body decoded lossily as UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
