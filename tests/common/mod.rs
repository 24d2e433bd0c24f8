//! In-process HTTP origin replaying canned bodies, so pipeline tests run
//! against a real server without touching the network.

// not every test binary uses every helper
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;

#[derive(Clone)]
pub struct Page {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

pub struct Origin {
    pub addr: SocketAddr,
    state: Arc<OriginState>,
}

struct OriginState {
    pages: HashMap<String, Page>,
    delay: Duration,
    hits: Mutex<HashMap<String, usize>>,
    in_flight: Mutex<HashSet<String>>,
    overlap_seen: AtomicBool,
}

impl Origin {
    /// Starts an origin serving `pages` (path → page) on an ephemeral port.
    pub async fn start(pages: Vec<(&str, Page)>) -> Origin {
        Origin::start_with_delay(pages, Duration::ZERO).await
    }

    /// Same, with an artificial per-request delay so concurrent fetches of
    /// one path overlap observably.
    pub async fn start_with_delay(pages: Vec<(&str, Page)>, delay: Duration) -> Origin {
        let state = Arc::new(OriginState {
            pages: pages
                .into_iter()
                .map(|(path, page)| (path.to_string(), page))
                .collect(),
            delay,
            hits: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            overlap_seen: AtomicBool::new(false),
        });
        let app = Router::new()
            .fallback(serve_page)
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test origin");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("test origin");
        });
        Origin { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of requests the origin saw for `path`.
    pub fn hits(&self, path: &str) -> usize {
        *self.state.hits.lock().unwrap().get(path).unwrap_or(&0)
    }

    /// True when two requests for the same path were ever in flight at
    /// once.
    pub fn saw_overlap(&self) -> bool {
        self.state.overlap_seen.load(Ordering::SeqCst)
    }
}

pub fn html(body: &str) -> Page {
    Page {
        content_type: "text/html",
        body: body.as_bytes().to_vec(),
    }
}

pub fn json(body: &str) -> Page {
    Page {
        content_type: "application/json",
        body: body.as_bytes().to_vec(),
    }
}

async fn serve_page(State(state): State<Arc<OriginState>>, req: Request<Body>) -> Response {
    let path = req.uri().path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    if !state.in_flight.lock().unwrap().insert(path.clone()) {
        state.overlap_seen.store(true, Ordering::SeqCst);
    }
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    let response = match state.pages.get(&path) {
        Some(page) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, page.content_type)],
            page.body.clone(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    };
    state.in_flight.lock().unwrap().remove(&path);
    response
}
