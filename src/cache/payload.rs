//! Cached response payloads.
//!
//! A `CachedPayload` is the buffered result of rendering a response: status,
//! an ordered list of header mutations, the body bytes and an expiry.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::OffsetDateTime;

/// One header operation, replayed in order when the payload is served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HeaderMutation {
    /// Replace every value of `name` with `value`.
    Set { name: String, value: String },
    /// Add `value` alongside existing values of `name`.
    Append { name: String, value: String },
    /// Drop every value of `name`.
    Remove { name: String },
}

impl HeaderMutation {
    pub fn set(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn append(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Append {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self::Remove { name: name.into() }
    }

    /// Apply to `headers`. Names or values that are not valid HTTP tokens are skipped.
    pub fn apply(&self, headers: &mut HeaderMap) {
        match self {
            HeaderMutation::Set { name, value } => {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.insert(name, value);
                }
            }
            HeaderMutation::Append { name, value } => {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.append(name, value);
                }
            }
            HeaderMutation::Remove { name } => {
                if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                    headers.remove(name);
                }
            }
        }
    }
}

/// Buffered, serializable response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPayload {
    #[serde(with = "body_base64")]
    pub contents: Bytes,
    pub status_code: u16,
    pub header_mutations: Vec<HeaderMutation>,
    pub http_cache_control: Option<String>,
    pub expire_at: OffsetDateTime,
}

impl CachedPayload {
    pub fn new(status_code: u16, contents: impl Into<Bytes>, expire_at: OffsetDateTime) -> Self {
        Self {
            contents: contents.into(),
            status_code,
            header_mutations: Vec::new(),
            http_cache_control: None,
            expire_at,
        }
    }

    pub fn with_header(mut self, mutation: HeaderMutation) -> Self {
        self.header_mutations.push(mutation);
        self
    }

    pub fn with_cache_control(mut self, value: impl Into<String>) -> Self {
        self.http_cache_control = Some(value.into());
        self
    }

    /// Capture status, headers and body of a rendered response.
    ///
    /// Headers become `Append` mutations so multi-valued headers survive;
    /// `Cache-Control` is kept apart in `http_cache_control`.
    pub fn from_parts(
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
        expire_at: OffsetDateTime,
    ) -> Self {
        let mut payload = Self::new(status.as_u16(), body, expire_at);
        for (name, value) in headers {
            if *name == header::CACHE_CONTROL {
                if let Ok(value) = value.to_str() {
                    payload.http_cache_control = Some(value.to_string());
                }
                continue;
            }
            if let Ok(value) = value.to_str() {
                payload
                    .header_mutations
                    .push(HeaderMutation::append(name.as_str(), value));
            }
        }
        payload
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expire_at < now
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Rebuild an HTTP response from the payload.
    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let mut response = Response::new(Body::from(self.contents));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for mutation in &self.header_mutations {
            mutation.apply(headers);
        }
        if let Some(cache_control) = self.http_cache_control
            && let Ok(value) = HeaderValue::from_str(&cache_control)
        {
            headers.insert(header::CACHE_CONTROL, value);
        }

        response
    }
}

mod body_base64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
