//! Tag collector for the response cache layer.
//!
//! Uses `tokio::task_local!` so handlers can attach tag characteristics to the
//! response they are rendering. Tags are recorded by handlers or services and
//! collected when the request completes, then stored with the cached response.

use std::cell::RefCell;
use std::mem;

use super::characteristics::{Characteristics, Scalar};

tokio::task_local! {
    static TAGS: RefCell<Characteristics>;
}

/// Record a tag for the response being rendered.
///
/// If no collector is active, the call is silently ignored.
///
/// # Example
///
/// ```ignore
/// // Before loading a post so edits to it evict this response
/// respcache::cache::tags::record("post", post_id);
/// ```
pub fn record(key: impl Into<String>, value: impl Into<Scalar>) {
    let _ = TAGS.try_with(|tags| {
        let mut tags = tags.borrow_mut();
        *tags = mem::take(&mut *tags).with(key, value);
    });
}

/// Tags recorded so far in the current task.
///
/// Returns an empty set outside a collector.
pub fn collect() -> Characteristics {
    TAGS.try_with(|tags| tags.borrow().clone())
        .unwrap_or_default()
}

/// Run `f` with a fresh collector and return its output with the recorded tags.
pub async fn with_collector<F, R>(f: F) -> (R, Characteristics)
where
    F: Future<Output = R>,
{
    TAGS.scope(RefCell::new(Characteristics::new()), async move {
        let result = f.await;
        (result, collect())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_without_collector_is_no_op() {
        record("post", 1);
        assert!(collect().is_empty());
    }

    #[tokio::test]
    async fn with_collector_captures_tags() {
        let (value, tags) = with_collector(async {
            record("post", 7);
            record("lang", "en");
            42
        })
        .await;

        assert_eq!(value, 42);
        assert_eq!(tags, Characteristics::new().with("post", 7).with("lang", "en"));
    }

    #[tokio::test]
    async fn later_records_overwrite_same_key() {
        let (_, tags) = with_collector(async {
            record("post", 1);
            record("post", 2);
        })
        .await;

        assert_eq!(tags, Characteristics::new().with("post", 2));
    }

    #[tokio::test]
    async fn collectors_do_not_leak_between_scopes() {
        let (_, first) = with_collector(async { record("a", 1) }).await;
        let (_, second) = with_collector(async {}).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}
