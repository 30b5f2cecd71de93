use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    body::Body,
    extract::Path,
    http::{Method, Request, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use respcache::cache::{
    CacheConfig, CacheState, CacheVerifying, Characteristics, LocalTransactionManager,
    MemoryStoreResolver, Namespace, Partition, ResponseCacheStore, tags,
};
use tower::ServiceExt;

struct App {
    router: Router,
    engine: Arc<ResponseCacheStore>,
    resolver: MemoryStoreResolver,
    calls: Arc<AtomicUsize>,
}

fn app(config: CacheConfig) -> App {
    let resolver = MemoryStoreResolver::new();
    let engine = Arc::new(ResponseCacheStore::new(
        Arc::new(resolver.clone()),
        CacheVerifying::default(),
        Arc::new(LocalTransactionManager::new()),
    ));
    let calls = Arc::new(AtomicUsize::new(0));

    let post_calls = Arc::clone(&calls);
    let missing_calls = Arc::clone(&calls);
    let router = Router::new()
        .route(
            "/posts/{id}",
            get(move |Path(id): Path<i64>| {
                let calls = Arc::clone(&post_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tags::record("post", id);
                    (
                        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                        format!("post {id}"),
                    )
                }
            })
            .post(|| async { StatusCode::CREATED }),
        )
        .route("/big", get(|| async { "x".repeat(64) }))
        .route(
            "/missing",
            get(move || {
                let calls = Arc::clone(&missing_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NOT_FOUND.into_response()
                }
            }),
        )
        .layer(middleware::from_fn_with_state(
            CacheState {
                config,
                engine: engine.clone(),
            },
            respcache::cache::response_cache_layer,
        ));

    App {
        router,
        engine,
        resolver,
        calls,
    }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
) -> (StatusCode, String, Option<String>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "blog.example")
        .body(Body::empty())
        .expect("request should build");
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should buffer");
    (
        status,
        String::from_utf8(bytes.to_vec()).expect("utf-8 body"),
        content_type,
    )
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let app = app(CacheConfig::default());

    let first = send(&app.router, Method::GET, "/posts/1").await;
    let second = send(&app.router, Method::GET, "/posts/1").await;

    assert_eq!(first, second);
    assert_eq!(second.0, StatusCode::OK);
    assert_eq!(second.1, "post 1");
    assert_eq!(second.2.as_deref(), Some("text/plain; charset=utf-8"));
    assert_eq!(app.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recorded_tags_are_indexed() {
    let app = app(CacheConfig::default());

    send(&app.router, Method::GET, "/posts/7").await;

    let store = app.resolver.store(Partition::Local);
    assert_eq!(store.len(Namespace::Response), 1);
    assert_eq!(store.len(Namespace::Index), 1);
    assert!(app.resolver.store(Partition::Shared).is_empty());
}

#[tokio::test]
async fn removal_by_tag_forces_a_fresh_render() {
    let app = app(CacheConfig::default());

    send(&app.router, Method::GET, "/posts/1").await;
    send(&app.router, Method::GET, "/posts/2").await;
    app.engine
        .remove_by_characteristics(&Characteristics::new().with("post", 1), Partition::Local)
        .expect("remove by tag");

    send(&app.router, Method::GET, "/posts/1").await;
    send(&app.router, Method::GET, "/posts/2").await;

    assert_eq!(app.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn query_strings_are_part_of_the_key() {
    let app = app(CacheConfig::default());

    send(&app.router, Method::GET, "/posts/1?page=1&sort=new").await;
    send(&app.router, Method::GET, "/posts/1?sort=new&page=1").await;
    assert_eq!(app.calls.load(Ordering::SeqCst), 1);

    send(&app.router, Method::GET, "/posts/1?page=2").await;
    send(&app.router, Method::GET, "/posts/1").await;
    assert_eq!(app.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unsuccessful_and_non_get_responses_are_not_cached() {
    let app = app(CacheConfig::default());

    send(&app.router, Method::GET, "/missing").await;
    send(&app.router, Method::GET, "/missing").await;
    assert_eq!(app.calls.load(Ordering::SeqCst), 2);

    let (status, _, _) = send(&app.router, Method::POST, "/posts/1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(app.resolver.store(Partition::Local).is_empty());
}

#[tokio::test]
async fn oversized_body_is_served_uncached() {
    let app = app(CacheConfig {
        max_body_bytes: 16,
        ..Default::default()
    });

    let (status, body, _) = send(&app.router, Method::GET, "/big").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "x".repeat(64));
    assert!(app.resolver.store(Partition::Local).is_empty());
}

#[tokio::test]
async fn trailing_slash_is_a_distinct_request() {
    let app = app(CacheConfig::default());

    let (status, _, _) = send(&app.router, Method::GET, "/posts/1").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body, _) = send(&app.router, Method::GET, "/posts/1/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_ne!(body, "post 1");
    assert_eq!(app.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shared_partition_setting_routes_writes() {
    let app = app(CacheConfig {
        shared_partition: true,
        ..Default::default()
    });

    send(&app.router, Method::GET, "/posts/3").await;

    assert_eq!(
        app.resolver.store(Partition::Shared).len(Namespace::Response),
        1
    );
    assert!(app.resolver.store(Partition::Local).is_empty());
}

#[tokio::test]
async fn disabled_cache_passes_through() {
    let app = app(CacheConfig {
        enabled: false,
        ..Default::default()
    });

    send(&app.router, Method::GET, "/posts/1").await;
    send(&app.router, Method::GET, "/posts/1").await;

    assert_eq!(app.calls.load(Ordering::SeqCst), 2);
    assert!(app.resolver.store(Partition::Local).is_empty());
}
