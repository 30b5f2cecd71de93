//! Response identities.
//!
//! A `ResponseIdentity` names one cached response: method, host, path and
//! (optionally) the query parameters that take part in the match.

use std::fmt;

use axum::http::Method;

use super::characteristics::{Characteristics, Scalar};

const KEY_METHOD: &str = "method";
const KEY_HOST: &str = "hostName";
const KEY_PATH: &str = "path";
const KEY_QUERY: &str = "query";

/// Slash-separated request path, stored as its segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RequestPath {
    segments: Vec<String>,
}

impl RequestPath {
    /// Parse a path such as `/posts/hello`. The leading slash is optional;
    /// empty segments are kept, so `/a/b/`, `//a/b` and `/a/b` stay distinct.
    pub fn parse(path: &str) -> Self {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() {
            return Self::default();
        }
        Self {
            segments: path.split('/').map(str::to_string).collect(),
        }
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for RequestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Identity of a request/response pairing.
///
/// `query_params == None` matches the unparameterized request only, which is
/// distinct from `Some(empty)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseIdentity {
    pub method: Method,
    pub host_name: String,
    pub path: RequestPath,
    pub query_params: Option<Characteristics>,
}

impl ResponseIdentity {
    pub fn new(
        method: Method,
        host_name: impl Into<String>,
        path: RequestPath,
        query_params: Option<Characteristics>,
    ) -> Self {
        Self {
            method,
            host_name: host_name.into(),
            path,
            query_params,
        }
    }

    /// Storage key of the response entry for this identity.
    pub fn response_key(&self) -> Characteristics {
        let query = match &self.query_params {
            Some(params) => Scalar::Str(params.canonical()),
            None => Scalar::Null,
        };

        Characteristics::new()
            .with(KEY_METHOD, self.method.as_str())
            .with(KEY_HOST, self.host_name.as_str())
            .with(KEY_PATH, self.path.to_string())
            .with(KEY_QUERY, query)
    }
}

impl fmt::Display for ResponseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}{}", self.method, self.host_name, self.path)?;
        if let Some(params) = &self.query_params {
            write!(f, "?{params}")?;
        }
        Ok(())
    }
}
