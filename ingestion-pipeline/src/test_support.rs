//! Local stand-in for the remote archive, serving byte ranges of in-memory
//! segments over HTTP.

use std::{
    collections::HashMap,
    io::Write,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use flate2::{write::GzEncoder, Compression};
use tokio::{net::TcpListener, sync::Mutex};

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

#[derive(Default)]
struct ArchiveState {
    segments: Mutex<HashMap<String, Vec<u8>>>,
    forced_status: Mutex<Option<StatusCode>>,
    ranges: Mutex<Vec<String>>,
    user_agents: Mutex<Vec<String>>,
    hits: AtomicUsize,
}

#[derive(Clone)]
pub struct MockArchive {
    state: Arc<ArchiveState>,
    base_url: String,
}

impl MockArchive {
    pub async fn start() -> Self {
        let state = Arc::new(ArchiveState::default());
        let app = Router::new()
            .route("/{*path}", get(serve_segment))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock archive server");
        });

        Self {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub async fn insert(&self, path: &str, data: Vec<u8>) {
        self.state
            .segments
            .lock()
            .await
            .insert(path.to_string(), data);
    }

    pub async fn respond_with(&self, status: StatusCode) {
        *self.state.forced_status.lock().await = Some(status);
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub async fn ranges(&self) -> Vec<String> {
        self.state.ranges.lock().await.clone()
    }

    pub async fn user_agents(&self) -> Vec<String> {
        self.state.user_agents.lock().await.clone()
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (first, last) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((first.parse().ok()?, last.parse().ok()?))
}

async fn serve_segment(
    State(state): State<Arc<ArchiveState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(range) = &range {
        state.ranges.lock().await.push(range.clone());
    }
    if let Some(agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        state.user_agents.lock().await.push(agent.to_string());
    }

    if let Some(status) = *state.forced_status.lock().await {
        return status.into_response();
    }

    let segments = state.segments.lock().await;
    let Some(segment) = segments.get(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match range.as_deref().and_then(parse_range) {
        Some((first, last)) if first < segment.len() => {
            let end = last.saturating_add(1).min(segment.len());
            let body = segment[first..end].to_vec();
            (StatusCode::PARTIAL_CONTENT, body).into_response()
        }
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => (StatusCode::OK, segment.clone()).into_response(),
    }
}
