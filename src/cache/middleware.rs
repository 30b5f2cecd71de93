//! Response cache middleware.
//!
//! Serves cached GET responses and stores cacheable misses together with the
//! tags handlers recorded while rendering them.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, header},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig, ResponseCacheStore,
    characteristics::Characteristics,
    identity::{RequestPath, ResponseIdentity},
    payload::CachedPayload,
    record::CacheRecord,
    tags,
};

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub engine: Arc<ResponseCacheStore>,
}

/// Middleware for response caching.
///
/// Only GET requests are served from or written to the cache. Misses run the
/// handler inside `tags::with_collector()` and store the response when
/// `should_store_response` allows it.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled || request.method() != Method::GET {
        return next.run(request).await;
    }

    let id = identity_from_request(&request);
    let partition = cache.config.partition();
    let now = OffsetDateTime::now_utc();

    match cache.engine.get(&id, partition, now) {
        Ok(Some(record)) => {
            debug!(cache = "response", outcome = "hit", "serving cached response");
            return record.payload.into_response();
        }
        Ok(None) => {
            debug!(
                cache = "response",
                outcome = "miss",
                "cache miss, executing handler"
            );
        }
        Err(error) => {
            warn!(error = %error, "cache lookup failed, executing handler");
        }
    }

    let (response, tags) = tags::with_collector(next.run(request)).await;

    if !should_store_response(&response, cache.config.max_body_bytes) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match BodyExt::collect(body).await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            warn!(error = %error, "failed to buffer response body for caching");
            return Response::from_parts(parts, Body::empty());
        }
    };

    if bytes.len() > cache.config.max_body_bytes {
        debug!(
            cache = "response",
            body_bytes = bytes.len(),
            limit = cache.config.max_body_bytes,
            "response body exceeds cache limit, serving uncached"
        );
        return Response::from_parts(parts, Body::from(bytes));
    }

    let payload = CachedPayload::from_parts(
        parts.status,
        &parts.headers,
        bytes.clone(),
        now + cache.config.default_ttl(),
    );
    let record = CacheRecord::new(payload).with_tags(tags);

    debug!(
        cache = "response",
        tags = %record.tag_characteristics,
        "caching response"
    );
    if let Err(error) = cache.engine.store(&id, &record, partition) {
        warn!(error = %error, "failed to store response in cache");
    }

    Response::from_parts(parts, Body::from(bytes))
}

/// Identity of `request`: method, `Host` header (or URI authority), path and
/// the decoded query string when one is present.
pub fn identity_from_request<B>(request: &Request<B>) -> ResponseIdentity {
    let uri = request.uri();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|authority| authority.to_string()))
        .unwrap_or_default();

    let query = uri.query().map(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect::<Characteristics>()
    });

    ResponseIdentity::new(
        request.method().clone(),
        host,
        RequestPath::parse(uri.path()),
        query,
    )
}

/// Whether a rendered response may be cached.
pub fn should_store_response(response: &Response, max_body_bytes: usize) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    if response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
    {
        return false;
    }

    let declared_length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_length.is_some_and(|length| length > max_body_bytes) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, StatusCode};

    use super::*;
    use crate::cache::characteristics::Scalar;

    #[test]
    fn identity_uses_host_header_path_and_query() {
        let req = Request::builder()
            .uri("/search?q2=2&q1=1")
            .header(header::HOST, "example.org")
            .body(Body::empty())
            .unwrap();

        let id = identity_from_request(&req);
        assert_eq!(id.method, Method::GET);
        assert_eq!(id.host_name, "example.org");
        assert_eq!(id.path, RequestPath::parse("/search"));
        assert_eq!(
            id.query_params,
            Some(Characteristics::new().with("q1", "1").with("q2", "2"))
        );
    }

    #[test]
    fn identity_without_query_is_unparameterized() {
        let req = Request::builder()
            .uri("http://fallback.example/posts")
            .body(Body::empty())
            .unwrap();

        let id = identity_from_request(&req);
        assert_eq!(id.host_name, "fallback.example");
        assert!(id.query_params.is_none());
        assert_eq!(id.response_key().get("query"), Some(&Scalar::Null));
    }

    #[test]
    fn query_values_are_percent_decoded() {
        let req = Request::builder()
            .uri("/s?term=a%20b")
            .body(Body::empty())
            .unwrap();

        let id = identity_from_request(&req);
        assert_eq!(
            id.query_params.and_then(|q| q.get("term").cloned()),
            Some(Scalar::Str("a b".into()))
        );
    }

    #[test]
    fn only_plain_successful_responses_are_stored() {
        let ok = Response::new(Body::from("ok"));
        assert!(should_store_response(&ok, 1024));

        let mut not_found = Response::new(Body::empty());
        *not_found.status_mut() = StatusCode::NOT_FOUND;
        assert!(!should_store_response(&not_found, 1024));

        let mut with_cookie = Response::new(Body::empty());
        with_cookie
            .headers_mut()
            .insert(header::SET_COOKIE, HeaderValue::from_static("id=1"));
        assert!(!should_store_response(&with_cookie, 1024));

        let mut stream = Response::new(Body::empty());
        stream.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        assert!(!should_store_response(&stream, 1024));

        let mut large = Response::new(Body::empty());
        large
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("4096"));
        assert!(!should_store_response(&large, 1024));
    }
}
