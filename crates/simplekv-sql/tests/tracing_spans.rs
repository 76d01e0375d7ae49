//! Integration test verifying that `SqlStore` operations open their spans.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use simplekv::{Context, Expiry, Store};
use simplekv_sql::testutil::TestDatabase;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn collect() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    (spans, tracing::subscriber::set_default(subscriber))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_operations_produce_distinct_spans() {
    let (spans, _guard) = collect();

    let db = TestDatabase::new().await;
    let store = db.store();
    let scope = store.scope(Context::background()).await.expect("scope");
    store.set(&scope, "k", b"v".to_vec(), Expiry::Never).await.expect("set");
    let _ = store.get(&scope, "k").await;
    store.update(&scope, "k", Expiry::Never, |_| Ok(b"w".to_vec())).await.expect("update");
    let _ = store.keys(&scope).await;

    let recorded = spans.lock().expect("lock poisoned");
    for name in ["scope", "set", "get", "update", "keys"] {
        assert!(
            recorded.iter().any(|s| s == name),
            "missing span '{name}', recorded: {recorded:?}"
        );
    }
}
