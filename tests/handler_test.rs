//! HTTP surface tests: method handling, parameter validation, response
//! shapes (JSON and JSONP) and response ordering.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use tower::ServiceExt;
use unfurl::{router, Preview, UnfurlConfig, UnfurlService};

use common::{html, Origin};

fn app() -> axum::Router {
    let service = Arc::new(UnfurlService::new(UnfurlConfig::new()).unwrap());
    router(service)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn rejects_unsupported_methods() {
    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/?content=x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = response
        .headers()
        .get(header::ALLOW)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(allow.contains("GET"), "Allow header was {allow:?}");
    assert!(allow.contains("POST"), "Allow header was {allow:?}");
}

#[tokio::test]
async fn missing_content_is_a_bad_request() {
    for uri in ["/", "/?content="] {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri {uri}");
    }
}

#[tokio::test]
async fn content_without_urls_yields_an_empty_list() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/?content=no+links+in+here")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "[]");
}

#[tokio::test]
async fn previews_come_back_in_input_order() {
    let origin = Origin::start(vec![
        ("/a", html("<html><head><title>Page A</title></head></html>")),
        ("/b", html("<html><head><title>Page B</title></head></html>")),
    ])
    .await;
    let content = format!(
        "{} then {} then {} again",
        origin.url("/b"),
        origin.url("/a"),
        origin.url("/b"),
    );
    let uri = format!(
        "/?content={}",
        url::form_urlencoded::byte_serialize(content.as_bytes()).collect::<String>()
    );

    let response = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let previews: Vec<Preview> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(previews.len(), 2);
    assert_eq!(previews[0].url, origin.url("/b"));
    assert_eq!(previews[0].title, "Page B");
    assert_eq!(previews[1].url, origin.url("/a"));
    assert_eq!(previews[1].title, "Page A");
}

#[tokio::test]
async fn post_form_parameters_are_accepted() {
    let origin = Origin::start(vec![(
        "/p",
        html("<html><head><title>Posted</title></head></html>"),
    )])
    .await;
    let form = format!(
        "content={}",
        url::form_urlencoded::byte_serialize(origin.url("/p").as_bytes()).collect::<String>()
    );

    let response = app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(form))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let previews: Vec<Preview> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].title, "Posted");
}

#[tokio::test]
async fn jsonp_wraps_the_payload() {
    let origin = Origin::start(vec![(
        "/j",
        html("<html><head><title>Wrapped</title></head></html>"),
    )])
    .await;
    let uri = format!(
        "/?callback=cb&content={}",
        url::form_urlencoded::byte_serialize(origin.url("/j").as_bytes()).collect::<String>()
    );

    let response = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/x-javascript")
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );

    let body = body_string(response).await;
    assert!(body.starts_with("cb(["), "body was {body:?}");
    assert!(body.ends_with("])"), "body was {body:?}");
    let inner: Vec<Preview> =
        serde_json::from_str(&body[3..body.len() - 1]).expect("payload inside callback");
    assert_eq!(inner[0].title, "Wrapped");
}

#[tokio::test]
async fn markdown_parameter_switches_extraction_mode() {
    let origin = Origin::start(vec![(
        "/m",
        html("<html><head><title>Markdown link</title></head></html>"),
    )])
    .await;
    let content = format!("Paragraph {} but not `{}`", origin.url("/m"), origin.url("/skip"));
    let uri = format!(
        "/?markdown=true&content={}",
        url::form_urlencoded::byte_serialize(content.as_bytes()).collect::<String>()
    );

    let response = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let previews: Vec<Preview> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].title, "Markdown link");
    assert_eq!(origin.hits("/skip"), 0);
}
