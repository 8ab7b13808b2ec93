//! End-to-end behavior of the offline layer over a scripted origin.

mod common;

use bytes::Bytes;
use common::{active_worker, config, store, url, FakeOrigin, ORIGIN, QR_LIB};
use http::header::CONTENT_TYPE;
use http::StatusCode;
use offkit_net::{Destination, Request, Response, ResponseSource, Url};
use offkit_sw::{FetchOutcome, ServiceWorker, WorkerState};

#[tokio::test]
async fn stored_asset_is_served_without_network() {
    let origin = FakeOrigin::with_app_shell();
    origin.serve("/static/farm_app/app.js", "console.log('farm')");
    let store = store();
    let worker = active_worker(1, &store, origin.clone()).await;

    let request = Request::get(url("/static/farm_app/app.js")).destination(Destination::Script);
    worker.handle_fetch(&request).await;
    let calls = origin.calls();

    let outcome = worker.handle_fetch(&request).await;
    let response = outcome.response().unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(origin.calls(), calls);
}

#[tokio::test]
async fn non_get_never_touches_store() {
    let origin = FakeOrigin::with_app_shell();
    let store = store();
    let worker = active_worker(1, &store, origin).await;
    let before = store.stats();

    let post = Request::post(
        url("/api/sync/"),
        Bytes::from_static(br#"{"activities":[{"tree_id":"T-1"}]}"#),
    );
    assert!(matches!(
        worker.handle_fetch(&post).await,
        FetchOutcome::Passthrough
    ));

    let after = store.stats();
    assert_eq!(after.reads, before.reads);
    assert_eq!(after.writes, before.writes);
    assert_eq!(after.write_failures, before.write_failures);
}

#[tokio::test]
async fn activation_leaves_only_new_generation() {
    let origin = FakeOrigin::with_app_shell();
    let store = store();
    active_worker(1, &store, origin.clone()).await;
    active_worker(2, &store, origin.clone()).await;
    assert_eq!(store.keys().await, vec!["farm-management-v2"]);

    active_worker(3, &store, origin).await;
    assert_eq!(store.keys().await, vec!["farm-management-v3"]);
}

#[tokio::test]
async fn trailing_slash_variants_hit_both_ways() {
    let origin = FakeOrigin::with_app_shell();
    let store = store();
    let worker = active_worker(1, &store, origin.clone()).await;
    origin.set_online(false);

    let response = worker
        .handle_fetch(&Request::navigate(url("/scan")))
        .await
        .response()
        .cloned()
        .unwrap();
    assert_eq!(response.text().unwrap(), "<h1>Scan a tree</h1>");
    assert_eq!(response.source, ResponseSource::Cache);

    // Only the slash-less form stored.
    let generation = worker.generation();
    generation
        .put_key("/reports", &Response::new(StatusCode::OK, "reports"))
        .await
        .unwrap();
    let response = worker
        .handle_fetch(&Request::navigate(url("/reports/")))
        .await
        .response()
        .cloned()
        .unwrap();
    assert_eq!(response.text().unwrap(), "reports");
}

#[tokio::test]
async fn offline_empty_store_navigation_gets_offline_page() {
    let origin = FakeOrigin::new();
    origin.set_online(false);
    let store = store();
    let worker = active_worker(1, &store, origin).await;

    let outcome = worker
        .handle_fetch(&Request::navigate(url("/scan/")))
        .await;
    let response = outcome.response().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text().unwrap().contains("Offline"));
    assert_eq!(
        response.headers.get(CONTENT_TYPE).unwrap(),
        "text/html; charset=utf-8"
    );
}

#[tokio::test]
async fn offline_api_miss_is_exact_503() {
    let origin = FakeOrigin::with_app_shell();
    let store = store();
    let worker = active_worker(1, &store, origin.clone()).await;
    origin.set_online(false);

    let outcome = worker
        .handle_fetch(&Request::get(url("/api/tree/T-42/")))
        .await;
    let response = outcome.response().unwrap();
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers.get(CONTENT_TYPE).unwrap(), "application/json");
    assert_eq!(
        response.body,
        Bytes::from_static(br#"{"error":"Offline - no cached data"}"#)
    );
}

#[tokio::test]
async fn offline_api_hit_serves_last_copy() {
    let origin = FakeOrigin::with_app_shell();
    origin.serve("/api/synced-activities/", r#"{"activities":[]}"#);
    let store = store();
    let worker = active_worker(1, &store, origin.clone()).await;
    let request = Request::get(url("/api/synced-activities/"));

    worker.handle_fetch(&request).await;
    origin.set_online(false);

    let outcome = worker.handle_fetch(&request).await;
    assert_eq!(outcome.response().unwrap().status, StatusCode::OK);
}

#[tokio::test]
async fn storing_same_key_twice_keeps_latest() {
    let store = store();
    let generation = store.open("farm-management-v1").await.unwrap();
    let request = Request::get(url("/api/tree/T-1/"));

    generation
        .put(&request, &Response::new(StatusCode::OK, "first"))
        .await
        .unwrap();
    generation
        .put(&request, &Response::new(StatusCode::OK, "second"))
        .await
        .unwrap();

    assert_eq!(generation.len().await, 1);
    let hit = generation.match_key("/api/tree/T-1/").await.unwrap();
    assert_eq!(hit.text().unwrap(), "second");
}

#[tokio::test]
async fn third_party_failure_keeps_own_pages() {
    let origin = FakeOrigin::with_app_shell();
    origin.serve_absolute(
        QR_LIB,
        Response::new(StatusCode::BAD_GATEWAY, "upstream down"),
    );
    let store = store();
    let (worker, _events) = ServiceWorker::new(config(1), store.clone(), origin).unwrap();

    let report = worker.install().await.unwrap();
    assert_eq!(report.third_party_failed, vec![QR_LIB]);
    assert_eq!(report.seeded, 3);
    for page in ["/", "/scan/"] {
        assert!(worker.generation().match_key(page).await.is_some());
    }
}

#[tokio::test]
async fn old_worker_serves_until_new_one_activates() {
    let origin = FakeOrigin::with_app_shell();
    let store = store();
    let v1 = active_worker(1, &store, origin.clone()).await;

    origin.serve("/", "<h1>Farm home v2</h1>");
    let (v2, _events) = ServiceWorker::new(config(2), store.clone(), origin.clone()).unwrap();
    v2.install().await.unwrap();
    origin.set_online(false);

    let home = Request::navigate(url("/"));
    let served = v1.handle_fetch(&home).await.response().cloned().unwrap();
    assert_eq!(served.text().unwrap(), "<h1>Farm home</h1>");
    assert!(store.has("farm-management-v1").await);

    v2.activate().await.unwrap();
    v1.retire().await;
    assert_eq!(v1.state().await, WorkerState::Redundant);
    assert!(!store.has("farm-management-v1").await);

    let served = v2.handle_fetch(&home).await.response().cloned().unwrap();
    assert_eq!(served.text().unwrap(), "<h1>Farm home v2</h1>");
}

#[tokio::test]
async fn blocked_third_party_is_not_intercepted() {
    let origin = FakeOrigin::with_app_shell();
    let store = store();
    let worker = active_worker(1, &store, origin).await;

    let request = Request::get(Url::parse("https://tracker.example/pixel.gif").unwrap());
    assert!(worker.handle_fetch(&request).await.is_passthrough());
}

#[tokio::test]
async fn navigation_fallback_uses_cached_home() {
    let origin = FakeOrigin::with_app_shell();
    let store = store();
    let worker = active_worker(1, &store, origin.clone()).await;
    origin.set_online(false);

    let outcome = worker
        .handle_fetch(&Request::navigate(url("/reports/weekly")))
        .await;
    let response = outcome.response().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text().unwrap(), "<h1>Farm home</h1>");
    assert_eq!(response.url.as_ref().map(Url::as_str), Some(ORIGIN));
}
