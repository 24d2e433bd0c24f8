//! HTTP surface of the service: a single endpoint accepting GET or POST
//! with `content` (free text), optional `callback` (JSONP) and optional
//! `markdown` (context-aware URL extraction) parameters.

use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::service::UnfurlService;

/// Builds the unfurl router. Methods other than GET/POST receive
/// `405 Method Not Allowed` with the corresponding `Allow` header.
pub fn router(service: Arc<UnfurlService>) -> Router {
    Router::new()
        .route("/", get(unfurl).post(unfurl))
        .with_state(service)
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct UnfurlParams {
    #[serde(default)]
    content: String,
    #[serde(default)]
    callback: String,
    #[serde(default)]
    markdown: String,
}

impl UnfurlParams {
    /// Query parameters win over form fields, mirroring the precedence of
    /// merged request values.
    fn merged(query: Self, form: Option<Self>) -> Self {
        let form = form.unwrap_or_default();
        UnfurlParams {
            content: pick(query.content, form.content),
            callback: pick(query.callback, form.callback),
            markdown: pick(query.markdown, form.markdown),
        }
    }

    fn markdown_enabled(&self) -> bool {
        matches!(
            self.markdown.to_ascii_lowercase().as_str(),
            "1" | "t" | "true"
        )
    }
}

fn pick(first: String, second: String) -> String {
    if first.is_empty() {
        second
    } else {
        first
    }
}

async fn unfurl(
    State(service): State<Arc<UnfurlService>>,
    Query(query): Query<UnfurlParams>,
    form: Option<Form<UnfurlParams>>,
) -> Response {
    let params = UnfurlParams::merged(query, form.map(|Form(f)| f));
    if params.content.is_empty() {
        return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
    }

    let urls = service.extract_urls(&params.content, params.markdown_enabled());
    debug!(count = urls.len(), markdown = params.markdown_enabled(), "unfurling request");

    // Dropping this handler (client gone) cancels the fan-out; the guard
    // releases the token so single-flight waiters in other requests know
    // this initiator is dead.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let results = service.clone().unfurl_all(cancel, urls).await;

    if params.callback.is_empty() {
        return Json(results).into_response();
    }
    match serde_json::to_string(&results) {
        Ok(body) => (
            [
                (header::CONTENT_TYPE, "application/x-javascript"),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            format!("{}({})", params.callback, body),
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}
