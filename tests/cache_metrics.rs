mod support;

use std::{collections::HashSet, sync::Arc};

use metrics_util::debugging::DebuggingRecorder;
use precache::cache::{CacheStorage, MemoryStorage};
use support::{FakeOrigin, bucket, get, manager};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let storage = Arc::new(MemoryStorage::new());
    storage.open(&bucket("v5")).await.expect("open stale bucket");

    let origin = FakeOrigin::with_manifest("a");
    origin.fail("/offline.js");
    let manager = manager("v6", storage.clone(), origin.clone());
    manager.install().await.expect("install");
    // Eviction of the v5 bucket.
    manager.activate().await.expect("activate");

    // Cache-first hit, then miss with a network error.
    manager.handle_fetch(get("/styles/main.css")).await.expect("hit");
    manager
        .handle_fetch(get("/offline.js"))
        .await
        .expect_err("network failure");

    // Navigation hit schedules a revalidation.
    let outcome = manager.handle_fetch(get("/")).await.expect("navigation");
    if let precache::cache::FetchOutcome::Served(served) = outcome {
        if let Some(background) = served.background {
            background.settled().await;
        }
    }

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "precache_cache_hit_total",
        "precache_cache_miss_total",
        "precache_revalidate_total",
        "precache_network_error_total",
        "precache_bucket_evicted_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
