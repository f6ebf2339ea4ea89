//! Activity stream HTTP endpoint.
//!
//! `GET /v3/activity-stream/{feed}?cursor=<ts>&cursor=<id>` returns one page
//! of the feed. Other methods get 405. Requests are authenticated before
//! the feed is looked up; internal errors are never exposed.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use search_sync_shared::Cursor;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use url::Url;

use crate::activity_stream::auth::{HawkAuthenticator, HawkRequest};
use crate::activity_stream::pagination::{ActivityCursorPagination, ActivitySource};
use crate::clock::Clock;
use crate::errors::SyncError;

/// Path prefix of every feed.
pub const ACTIVITY_STREAM_PATH: &str = "/v3/activity-stream";

/// One served feed.
#[derive(Clone)]
pub struct ActivityFeed {
    pub summary: String,
    pub source: Arc<dyn ActivitySource>,
    /// Public URL of the feed, used for `next` links.
    pub collection_url: Url,
}

/// Shared state of the activity stream handlers.
#[derive(Clone)]
pub struct ActivityStreamState {
    feeds: Arc<HashMap<String, ActivityFeed>>,
    pagination: ActivityCursorPagination,
    auth: Arc<HawkAuthenticator>,
    clock: Arc<dyn Clock>,
    public_url: Url,
}

impl ActivityStreamState {
    pub fn new(
        pagination: ActivityCursorPagination,
        auth: Arc<HawkAuthenticator>,
        clock: Arc<dyn Clock>,
        public_url: Url,
    ) -> Self {
        Self {
            feeds: Arc::new(HashMap::new()),
            pagination,
            auth,
            clock,
            public_url,
        }
    }

    /// Serve `source` under `/v3/activity-stream/{name}`.
    pub fn with_feed(
        mut self,
        name: &str,
        summary: impl Into<String>,
        source: Arc<dyn ActivitySource>,
    ) -> Result<Self, SyncError> {
        let collection_url = self
            .public_url
            .join(&format!("{}/{}", ACTIVITY_STREAM_PATH, name))
            .map_err(|e| SyncError::config(format!("Invalid feed URL for {}: {}", name, e)))?;

        Arc::make_mut(&mut self.feeds).insert(
            name.to_string(),
            ActivityFeed {
                summary: summary.into(),
                source,
                collection_url,
            },
        );
        Ok(self)
    }

    pub fn feed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.feeds.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Create the router serving every feed of `state`.
pub fn create_app(state: ActivityStreamState) -> Router {
    Router::new()
        .route(
            &format!("{}/:feed", ACTIVITY_STREAM_PATH),
            get(activity_stream_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` completes.
pub async fn run_server<F>(app: Router, addr: SocketAddr, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Activity stream listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Host and port the client addressed, falling back to the public URL.
fn host_and_port<'a>(headers: &'a HeaderMap, public_url: &'a Url) -> (&'a str, u16) {
    let default_port = public_url.port_or_known_default().unwrap_or(80);
    match header_str(headers, header::HOST.as_str()) {
        Some(host) => match host.rsplit_once(':') {
            Some((name, port)) => match port.parse() {
                Ok(port) => (name, port),
                Err(_) => (host, default_port),
            },
            None => (host, default_port),
        },
        None => (public_url.host_str().unwrap_or_default(), default_port),
    }
}

async fn activity_stream_handler(
    State(state): State<ActivityStreamState>,
    Path(feed_name): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (host, port) = host_and_port(&headers, &state.public_url);
    let request = HawkRequest {
        method: method.as_str(),
        resource: uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path()),
        host,
        port,
        content_type: header_str(&headers, header::CONTENT_TYPE.as_str()).unwrap_or_default(),
        body: &body,
    };
    if state
        .auth
        .authenticate(
            &request,
            header_str(&headers, header::AUTHORIZATION.as_str()),
            header_str(&headers, "x-forwarded-for"),
        )
        .is_err()
    {
        return detail(StatusCode::UNAUTHORIZED, "Incorrect authentication credentials.");
    }

    let Some(feed) = state.feeds.get(&feed_name) else {
        return detail(StatusCode::NOT_FOUND, "Not found.");
    };

    let values: Vec<String> = url::form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
        .filter(|(key, _)| key == "cursor")
        .map(|(_, value)| value.into_owned())
        .collect();
    let cursor = match Cursor::from_query_values(&values) {
        Ok(cursor) => cursor,
        Err(e) => {
            info!(feed = %feed_name, error = %e, "Rejected invalid cursor");
            return detail(StatusCode::BAD_REQUEST, "Invalid cursor.");
        }
    };

    match state
        .pagination
        .paginate(
            feed.source.as_ref(),
            cursor,
            state.clock.now(),
            &feed.summary,
            &feed.collection_url,
        )
        .await
    {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => {
            error!(feed = %feed_name, error = %e, "Failed to serve activity page");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "A server error occurred.")
        }
    }
}
