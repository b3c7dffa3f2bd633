//! End-to-end tests of the `/sparql` route

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use quadstore_http::{EndpointConfig, GraphName, HttpServer, NamedNode, Quad, RdfStore, SparqlEngine};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

async fn seeded_store(count: usize) -> RdfStore {
    let store = RdfStore::new();
    store
        .extend((0..count).map(|i| {
            Quad::new(
                NamedNode::new(format!("ex://s{i}")).unwrap(),
                NamedNode::new(format!("ex://p{i}")).unwrap(),
                NamedNode::new(format!("ex://o{i}")).unwrap(),
                GraphName::DefaultGraph,
            )
        }))
        .await;
    store
}

fn app(store: &RdfStore) -> Router {
    let engine = Arc::new(SparqlEngine::new(store.clone()));
    HttpServer::new(engine, EndpointConfig::default()).router()
}

fn query_uri(query: &str) -> String {
    format!("/sparql?query={}", utf8_percent_encode(query, NON_ALPHANUMERIC))
}

fn get(query: &str, accept: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(query_uri(query));
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(content_type: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/sparql")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

fn binding_count(body: &str) -> usize {
    let json: Value = serde_json::from_str(body).unwrap();
    json["results"]["bindings"].as_array().unwrap().len()
}

#[tokio::test]
async fn test_select_defaults_to_sparql_results_json() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, content_type, body) = send(&app, get("SELECT * WHERE {?s ?p ?o}", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/sparql-results+json"));
    assert_eq!(binding_count(&body), 3);

    let json: Value = serde_json::from_str(&body).unwrap();
    let mut vars: Vec<_> = json["head"]["vars"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    vars.sort();
    assert_eq!(vars, ["o", "p", "s"]);
}

#[tokio::test]
async fn test_wildcard_accept_uses_default() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (_, content_type, body) = send(&app, get("SELECT * WHERE {?s ?p ?o}", Some("*/*"))).await;
    assert_eq!(content_type.as_deref(), Some("application/sparql-results+json"));
    assert_eq!(binding_count(&body), 3);
}

#[tokio::test]
async fn test_select_as_xml() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, content_type, body) = send(
        &app,
        get("SELECT * WHERE {?s ?p ?o}", Some("application/sparql-results+xml")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/sparql-results+xml"));
    assert_eq!(body.matches("<result>").count(), 3);
}

#[tokio::test]
async fn test_select_as_plain_json() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, content_type, body) = send(
        &app,
        get("SELECT ?s WHERE {?s ?p ?o} ORDER BY ?s", Some("application/json")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        json,
        serde_json::json!([{ "?s": "ex://s0" }, { "?s": "ex://s1" }, { "?s": "ex://s2" }])
    );
}

#[tokio::test]
async fn test_insert_then_select() {
    let store = RdfStore::new();
    let app = app(&store);

    let (status, _, body) = send(
        &app,
        post("application/sparql-update", "INSERT DATA { <urn:s> <urn:p> \"v\" }"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
    assert_eq!(store.len().await, 1);

    let (status, _, body) = send(&app, get("SELECT * WHERE { ?s ?p ?o }", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(binding_count(&body), 1);
}

#[tokio::test]
async fn test_update_via_get_is_rejected() {
    let store = seeded_store(3).await;
    let app = app(&store);
    let before = store.snapshot().await;

    let response = app
        .clone()
        .oneshot(get("INSERT DATA { <urn:s> <urn:p> \"v\" }", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "POST");

    let after = store.snapshot().await;
    assert_eq!(after.len(), 3);
    assert!(before.iter().all(|quad| after.contains(quad)));
}

#[tokio::test]
async fn test_unsupported_content_type() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, content_type, body) = send(&app, post("text/plain", "SELECT * WHERE { ?s ?p ?o }")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(body, r#"{"error":"unsupported content-type"}"#);
}

#[tokio::test]
async fn test_post_sparql_query_with_charset() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, _, body) = send(
        &app,
        post("application/sparql-query; charset=utf-8", "SELECT * WHERE { ?s ?p ?o }"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(binding_count(&body), 3);
}

#[tokio::test]
async fn test_form_post() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let form = format!(
        "query={}",
        utf8_percent_encode("SELECT ?o WHERE { <ex://s1> ?p ?o }", NON_ALPHANUMERIC)
    );
    let (status, _, body) = send(&app, post("application/x-www-form-urlencoded", &form)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(binding_count(&body), 1);

    let (status, _, body) = send(&app, post("application/x-www-form-urlencoded", "limit=10")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("query"));
}

#[tokio::test]
async fn test_form_update() {
    let store = RdfStore::new();
    let app = app(&store);

    let form = format!(
        "update={}",
        utf8_percent_encode("INSERT DATA { <urn:a> <urn:b> <urn:c> }", NON_ALPHANUMERIC)
    );
    let (status, _, _) = send(&app, post("application/x-www-form-urlencoded", &form)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_missing_query_parameter() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let request = Request::builder().uri("/sparql").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("error"));
}

#[tokio::test]
async fn test_unsupported_method() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/sparql")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn test_syntax_error() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, content_type, body) = send(&app, get("SELECT ?s WHERE { ?s ?p", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    let json: Value = serde_json::from_str(&body).unwrap();
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_unsupported_feature_is_server_error() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, _, body) = send(
        &app,
        get("SELECT (COUNT(?s) AS ?n) WHERE { ?s ?p ?o }", None),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("error"));
}

#[tokio::test]
async fn test_construct_negotiation() {
    let store = seeded_store(3).await;
    let app = app(&store);
    let construct = "CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }";

    let (status, content_type, body) = send(&app, get(construct, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/n-quads"));
    assert_eq!(body.lines().count(), 3);
    assert!(body.contains("<ex://s0> <ex://p0> <ex://o0> ."));

    let (status, content_type, body) = send(&app, get(construct, Some("application/trig"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/trig"));
    assert!(body.contains("<ex://s1>"));

    let (_, content_type, _) = send(&app, get(construct, Some("application/sparql-results+json"))).await;
    assert_eq!(content_type.as_deref(), Some("application/n-quads"));
}

#[tokio::test]
async fn test_ask() {
    let store = seeded_store(3).await;
    let app = app(&store);

    let (status, content_type, body) = send(&app, get("ASK { <ex://s2> ?p ?o }", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/sparql-results+json"));
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["boolean"], true);

    let (_, _, body) = send(&app, get("ASK { <ex://s9> ?p ?o }", Some("application/json"))).await;
    assert_eq!(body, "false");
}

#[tokio::test]
async fn test_repeated_read_is_stable() {
    let store = seeded_store(3).await;
    let app = app(&store);
    let query = "SELECT ?s ?o WHERE { ?s ?p ?o } ORDER BY ?s";

    let (_, _, first) = send(&app, get(query, None)).await;
    let (_, _, second) = send(&app, get(query, None)).await;
    assert_eq!(first, second);
    assert_eq!(store.len().await, 3);
}
