use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use tower::ServiceExt;

fn write_tiny_corpus(dir: &Path) {
    fs::write(
        dir.join("index.html"),
        r#"<html><body>
            <h1>Archive</h1>
            <a href="rust.html">rust systems programming</a>
            <a href="cooking.html">soup recipes</a>
        </body></html>"#,
    )
    .unwrap();
    fs::write(
        dir.join("rust.html"),
        r#"<html><body><p>Rust is great for building fast and safe programs. Learning rust pays off.</p></body></html>"#,
    )
    .unwrap();
    fs::write(
        dir.join("cooking.html"),
        r#"<html><body><p>Pumpkin soup with bread for winter evenings.</p></body></html>"#,
    )
    .unwrap();
}

fn crawled_app(dir: &Path) -> Router {
    sift_server::build_app(dir.to_str().unwrap(), Some("index.html"), None).unwrap()
}

async fn call(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_is_ok() {
    let dir = tempdir().unwrap();
    write_tiny_corpus(dir.path());
    let (status, _) = call(crawled_app(dir.path()), "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let dir = tempdir().unwrap();
    write_tiny_corpus(dir.path());

    let (status, json) = call(crawled_app(dir.path()), "/search?q=rust&k=5").await;
    assert_eq!(status, StatusCode::OK);
    let results = json["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["doc_id"], "rust.html");
    assert!(results[0]["score"].as_f64().unwrap() > 0.0);
    assert!(results[0]["snippet"]
        .as_str()
        .unwrap()
        .contains("<em>Rust</em>"));
    // Anchor texts from the inbound link ride along with the hit.
    let anchors = results[0]["anchor_texts"].as_array().unwrap();
    assert!(anchors.iter().any(|a| a == "rust systems programming"));
}

#[tokio::test]
async fn boolean_queries_are_unranked() {
    let dir = tempdir().unwrap();
    write_tiny_corpus(dir.path());

    let (status, json) = call(crawled_app(dir.path()), "/search?q=soup+and+bread").await;
    assert_eq!(status, StatusCode::OK);
    let results = json["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["doc_id"], "cooking.html");
    assert_eq!(results[0]["score"].as_f64().unwrap(), 0.0);
}

#[tokio::test]
async fn empty_query_yields_no_hits() {
    let dir = tempdir().unwrap();
    write_tiny_corpus(dir.path());

    let (status, json) = call(crawled_app(dir.path()), "/search?q=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_hits"], 0);
}

#[tokio::test]
async fn doc_endpoint_serves_text_and_links() {
    let dir = tempdir().unwrap();
    write_tiny_corpus(dir.path());

    let (status, json) = call(crawled_app(dir.path()), "/doc/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["doc_id"], "index.html");
    assert!(json["text"].as_str().unwrap().contains("Archive"));
    let outbound = json["outbound_links"].as_array().unwrap();
    assert_eq!(outbound.len(), 2);

    let (status, _) = call(crawled_app(dir.path()), "/doc/missing.html").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stats_reflect_the_crawl() {
    let dir = tempdir().unwrap();
    write_tiny_corpus(dir.path());

    let (status, json) = call(crawled_app(dir.path()), "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["num_docs"], 3);
    assert_eq!(json["crawl"]["pages_crawled"], 3);
    assert!(json["vocabulary_size"].as_u64().unwrap() > 0);
    assert!(json["average_out_degree"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn bulk_mode_indexes_without_crawl_stats() {
    let dir = tempdir().unwrap();
    write_tiny_corpus(dir.path());
    let app = sift_server::build_app(dir.path().to_str().unwrap(), None, None).unwrap();

    let (status, json) = call(app, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["num_docs"], 3);
    assert!(json["crawl"].is_null());
}
