//! HTTP surface for the MCP endpoint.
//!
//! Translates inbound requests into [`SessionRequest`]s for the
//! [`Supervisor`] and turns its [`Reply`] back into a response: a JSON
//! document, a bare status, or a server-sent event stream.

pub mod accept;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::mcp::lifecycle::{Reply, Supervisor};
use crate::mcp::session::SessionRequest;
use accept::{AcceptSet, EVENT_STREAM};

/// Liveness text served at `/`.
pub const LIVENESS_TEXT: &str = "Hello, MCP Server is available at /mcp";

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    supervisor: Supervisor,
}

/// Build the application router.
pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/mcp", get(open_stream).post(post_message))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(HttpState { supervisor })
}

/// Bind and serve until `shutdown` is cancelled and open connections drain.
pub async fn start_server(supervisor: Supervisor, shutdown: CancellationToken) -> Result<()> {
    let addr = supervisor.config().bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("MCP server listening on http://{}/mcp", listener.local_addr()?);

    axum::serve(listener, router(supervisor))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn liveness() -> &'static str {
    LIVENESS_TEXT
}

/// Health check endpoint.
async fn health_check(State(state): State<HttpState>) -> impl IntoResponse {
    let snapshot = state.supervisor.metrics().snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "name": crate::SERVER_NAME,
        "version": crate::VERSION,
        "activeSessions": snapshot.active_sessions,
    }))
}

/// Prometheus metrics endpoint.
async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.supervisor.metrics().to_prometheus(),
    )
}

/// `POST /mcp`: one message or a batch.
async fn post_message(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = SessionRequest {
        accept: widened_accept(&headers),
        body: Some(body),
    };
    into_response(state.supervisor.serve(request).await)
}

/// `GET /mcp`: open a server-to-client event stream.
async fn open_stream(State(state): State<HttpState>) -> Response {
    let request = SessionRequest {
        accept: AcceptSet::only(EVENT_STREAM),
        body: None,
    };
    into_response(state.supervisor.serve(request).await)
}

/// The caller's `Accept` tokens plus both tokens a bidirectional exchange
/// needs, whatever the caller declared.
pub fn widened_accept(headers: &HeaderMap) -> AcceptSet {
    let declared = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok());
    AcceptSet::parse_all(declared).union(&AcceptSet::bidirectional())
}

fn into_response(reply: Reply) -> Response {
    match reply {
        Reply::Immediate {
            status,
            body: Some(body),
        } => (status, Json(body)).into_response(),
        Reply::Immediate { status, body: None } => status.into_response(),
        Reply::Streaming(stream) => {
            let events = stream.map(|message| Event::default().event("message").json_data(message));
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
    }
}
