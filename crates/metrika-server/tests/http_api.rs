mod common;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{
    build_signed_context, build_sqlite_context, build_sync_dump_context, build_test_context,
    post_encoded, request_json, request_no_body, request_raw, send,
};
use metrika_common::codec::Compression;
use metrika_common::secure::Signer;
use metrika_common::MetricsDto;
use metrika_server::audit::AuditSink;
use metrika_storage::dumper;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn raw_counter_updates_accumulate() {
    let ctx = build_test_context().expect("test context should build");

    let resp = request_no_body(&ctx.app, "POST", "/update/counter/hits/5").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "OK");
    let resp = request_no_body(&ctx.app, "POST", "/update/counter/hits/7").await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request_no_body(&ctx.app, "GET", "/value/counter/hits").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "12");
}

#[tokio::test]
async fn raw_gauge_update_replaces_value() {
    let ctx = build_test_context().expect("test context should build");
    request_no_body(&ctx.app, "POST", "/update/gauge/temp/20.5").await;
    request_no_body(&ctx.app, "POST", "/update/gauge/temp/-3").await;
    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/temp").await;
    assert_eq!(resp.text(), "-3");
}

#[tokio::test]
async fn batch_then_index_lists_both_kinds() {
    let ctx = build_test_context().expect("test context should build");

    let resp = request_json(
        &ctx.app,
        "POST",
        "/updates/",
        json!([
            {"id": "g1", "type": "gauge", "value": 1.5},
            {"id": "c1", "type": "counter", "delta": 3}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request_no_body(&ctx.app, "GET", "/").await;
    assert_eq!(resp.status, StatusCode::OK);
    let content_type = resp.headers["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));
    let page = resp.text();
    assert!(page.contains("<li>g1=1.5</li>"), "page was: {page}");
    assert!(page.contains("<li>c1=3</li>"), "page was: {page}");
}

#[tokio::test]
async fn json_update_echoes_stored_metric() {
    let ctx = build_test_context().expect("test context should build");

    let body = json!({"id": "c1", "kind": "counter", "delta": 4});
    request_json(&ctx.app, "POST", "/update/", body.clone()).await;
    let resp = request_json(&ctx.app, "POST", "/update/", body).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "c1", "kind": "counter", "delta": 8}));

    let resp = request_json(
        &ctx.app,
        "POST",
        "/update/",
        json!({"id": "g1", "type": "gauge", "value": 0.25}),
    )
    .await;
    assert_eq!(resp.json(), json!({"id": "g1", "kind": "gauge", "value": 0.25}));
}

#[tokio::test]
async fn json_value_lookup() {
    let ctx = build_test_context().expect("test context should build");
    request_no_body(&ctx.app, "POST", "/update/gauge/g1/1.5").await;

    let resp = request_json(&ctx.app, "POST", "/value/", json!({"id": "g1", "type": "gauge"})).await;
    assert_eq!(resp.status, StatusCode::OK);
    let dto: MetricsDto = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(dto, MetricsDto::gauge("g1", 1.5));

    let resp = request_json(&ctx.app, "POST", "/value/", json!({"id": "g1", "type": "counter"})).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_errors_map_to_status_codes() {
    let ctx = build_test_context().expect("test context should build");

    let cases = [
        ("{not json", StatusCode::UNPROCESSABLE_ENTITY),
        (r#"{"id":"x","type":"gauge","value":"abc"}"#, StatusCode::UNPROCESSABLE_ENTITY),
        (r#"{"id":"","type":"gauge","value":1}"#, StatusCode::NOT_FOUND),
        (r#"{"type":"gauge","value":1}"#, StatusCode::NOT_FOUND),
        (r#"{"id":"x","type":"histogram","value":1}"#, StatusCode::BAD_REQUEST),
        (r#"{"id":"x","type":"counter","value":1.0}"#, StatusCode::BAD_REQUEST),
        (r#"{"id":"x","type":"gauge"}"#, StatusCode::BAD_REQUEST),
        (r#"{"id":"x","type":"gauge","value":1,"delta":1}"#, StatusCode::BAD_REQUEST),
    ];
    for (body, expected) in cases {
        let resp = request_raw(&ctx.app, "POST", "/update/", body).await;
        assert_eq!(resp.status, expected, "body: {body}");
    }

    let raw_cases = [
        ("/update/histogram/x/1", StatusCode::BAD_REQUEST),
        ("/update/gauge/x/abc", StatusCode::BAD_REQUEST),
        ("/update/counter/x/1.5", StatusCode::BAD_REQUEST),
        ("/update/gauge/x/inf", StatusCode::BAD_REQUEST),
        ("/update/gauge/", StatusCode::NOT_FOUND),
    ];
    for (uri, expected) in raw_cases {
        let resp = request_no_body(&ctx.app, "POST", uri).await;
        assert_eq!(resp.status, expected, "uri: {uri}");
    }

    let resp = request_raw(&ctx.app, "POST", "/updates/", r#"{"id":"x"}"#).await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);

    // nothing was stored along the way
    let resp = request_no_body(&ctx.app, "GET", "/").await;
    assert!(!resp.text().contains("<li>"));
}

#[tokio::test]
async fn value_errors_map_to_status_codes() {
    let ctx = build_test_context().expect("test context should build");
    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/absent").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let resp = request_no_body(&ctx.app, "GET", "/value/bogus/x").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    let resp = request_json(&ctx.app, "POST", "/value/", json!({"id": "", "type": "gauge"})).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let resp = request_raw(&ctx.app, "POST", "/value/", "[]").await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn memory_batch_is_best_effort() {
    let ctx = build_test_context().expect("test context should build");
    let resp = request_json(
        &ctx.app,
        "POST",
        "/updates/",
        json!([
            {"id": "g1", "type": "gauge", "value": 1.0},
            {"id": "g2", "type": "histogram", "value": 2.0}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/g1").await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn sqlite_batch_is_atomic() {
    let ctx = build_sqlite_context().expect("test context should build");
    request_no_body(&ctx.app, "POST", "/update/counter/c1/10").await;

    let resp = request_json(
        &ctx.app,
        "POST",
        "/updates/",
        json!([
            {"id": "g1", "type": "gauge", "value": 1.0},
            {"id": "c1", "type": "counter", "delta": 5},
            {"id": "c2", "type": "counter", "value": 1.0}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/g1").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let resp = request_no_body(&ctx.app, "GET", "/value/counter/c1").await;
    assert_eq!(resp.text(), "10");

    let resp = request_json(
        &ctx.app,
        "POST",
        "/updates/",
        json!([
            {"id": "g1", "type": "gauge", "value": 1.0},
            {"id": "c1", "type": "counter", "delta": 5}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = request_no_body(&ctx.app, "GET", "/value/counter/c1").await;
    assert_eq!(resp.text(), "15");
}

#[tokio::test]
async fn ping_reports_backend_health() {
    let ctx = build_test_context().expect("test context should build");
    let resp = request_no_body(&ctx.app, "GET", "/ping").await;
    assert_eq!(resp.status, StatusCode::OK);

    let ctx = build_sqlite_context().expect("test context should build");
    let resp = request_no_body(&ctx.app, "GET", "/ping").await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn responses_carry_trace_id() {
    let ctx = build_test_context().expect("test context should build");
    let resp = request_no_body(&ctx.app, "GET", "/ping").await;
    let trace = resp.headers["x-trace-id"].to_str().unwrap();
    assert_eq!(trace.len(), 16);
}

#[tokio::test]
async fn signature_mismatch_is_rejected_without_writing() {
    let ctx = build_signed_context("server-key").expect("test context should build");
    let body = json!([{"id": "g1", "type": "gauge", "value": 1.0}]);

    let wrong = Signer::new("other-key");
    let resp = post_encoded(&ctx.app, "/updates/", &body, Compression::None, Some(&wrong)).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().trim(), "invalid signature");

    let resp = post_encoded(&ctx.app, "/updates/", &body, Compression::None, None).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/g1").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signed_request_is_accepted_and_response_signed() {
    let ctx = build_signed_context("server-key").expect("test context should build");
    let signer = Signer::new("server-key");
    let body = json!({"id": "g1", "type": "gauge", "value": 2.5});

    let resp = post_encoded(&ctx.app, "/update/", &body, Compression::Gzip, Some(&signer)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let signature = resp.headers["HashSHA256"].to_str().unwrap();
    assert!(signer.verify(&resp.body, signature).is_ok());

    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/g1").await;
    assert_eq!(resp.text(), "2.5");
}

#[tokio::test]
async fn gzip_request_body_is_decoded() {
    let ctx = build_test_context().expect("test context should build");
    let body = json!([
        {"id": "a", "type": "counter", "delta": 2},
        {"id": "b", "type": "gauge", "value": 9.75}
    ]);
    let resp = post_encoded(&ctx.app, "/updates/", &body, Compression::Gzip, None).await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = request_no_body(&ctx.app, "GET", "/value/gauge/b").await;
    assert_eq!(resp.text(), "9.75");
}

#[tokio::test]
async fn responses_are_gzipped_on_request() {
    let ctx = build_test_context().expect("test context should build");
    for i in 0..5 {
        request_no_body(&ctx.app, "POST", &format!("/update/gauge/metric_{i}/{i}")).await;
    }
    let req = Request::builder()
        .method("GET")
        .uri("/")
        .header("Accept-Encoding", "gzip")
        .body(Body::empty())
        .unwrap();
    let resp = send(&ctx.app, req).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.headers["content-encoding"], "gzip");
    let page = Compression::Gzip.decode(&resp.body).unwrap();
    let page = String::from_utf8(page).unwrap();
    assert!(page.contains("<li>metric_3=3</li>"));
}

#[tokio::test]
async fn sync_dump_writes_snapshot_after_each_write() {
    let ctx = build_sync_dump_context().expect("test context should build");
    request_no_body(&ctx.app, "POST", "/update/gauge/cpu/12.34").await;
    request_no_body(&ctx.app, "POST", "/update/counter/reqs/56").await;

    let (gauges, counters) = dumper::restore(&ctx.dump_path()).unwrap();
    assert_eq!(gauges["cpu"].value, 12.34);
    assert_eq!(counters["reqs"].value, 56);

    // failed writes do not dump
    std::fs::remove_file(ctx.dump_path()).unwrap();
    let resp = request_no_body(&ctx.app, "POST", "/update/gauge/cpu/nope").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert!(!ctx.dump_path().exists());

    // reads do not dump
    request_no_body(&ctx.app, "GET", "/").await;
    assert!(!ctx.dump_path().exists());
}

#[derive(Default)]
struct RecordingSink {
    entries: Mutex<Vec<(Vec<String>, String)>>,
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn log_metrics(&self, ids: &[String], source_addr: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .push((ids.to_vec(), source_addr.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn accepted_writes_are_audited() {
    let ctx = build_test_context().expect("test context should build");
    let sink = Arc::new(RecordingSink::default());
    let app = metrika_server::app::build_http_app(ctx.state.clone().with_audit(sink.clone()));

    let req = Request::builder()
        .method("POST")
        .uri("/updates/")
        .header("X-Real-IP", "192.0.2.7")
        .body(Body::from(
            json!([
                {"id": "g1", "type": "gauge", "value": 1.0},
                {"id": "c1", "type": "counter", "delta": 1}
            ])
            .to_string(),
        ))
        .unwrap();
    assert_eq!(send(&app, req).await.status, StatusCode::OK);
    // rejected writes are not audited
    let resp = request_no_body(&app, "POST", "/update/gauge/x/bad").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let mut entries = Vec::new();
    for _ in 0..50 {
        entries = sink.entries.lock().unwrap().clone();
        if !entries.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        entries,
        vec![(vec!["g1".to_string(), "c1".to_string()], "192.0.2.7".to_string())]
    );
}
