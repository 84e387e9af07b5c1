//! Per-request session supervision and process shutdown.
//!
//! Every inbound request gets a freshly built [`ToolRegistry`] and
//! [`HttpTransport`], bound together in one [`Session`]. The supervisor runs
//! the exchange and guarantees that the session is torn down exactly once,
//! whichever way it ends:
//!
//! - the output was fully delivered ([`Outcome::Completed`]),
//! - an error or panic escaped the exchange ([`Outcome::Failed`]),
//! - the client dropped the connection first ([`Outcome::Aborted`]).

use axum::http::StatusCode;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::mcp::handler::ToolRegistry;
use crate::mcp::protocol::JsonRpcResponse;
use crate::mcp::session::{
    Outcome, Session, SessionOptions, SessionOutput, SessionRequest, SessionState, StateCell,
};
use crate::mcp::transport::{HttpTransport, Transport};
use crate::metrics::Metrics;

/// How long in-flight sessions may run after a termination signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Builds the tool registry for one session from the configuration snapshot.
pub type RegistryFactory = Arc<dyn Fn(&Config) -> Result<ToolRegistry> + Send + Sync>;

/// Supervised result of one request, ready for the HTTP layer.
pub enum Reply {
    /// A materialized reply. `body` is `None` for `202 Accepted`.
    Immediate {
        status: StatusCode,
        body: Option<Value>,
    },
    /// An event stream that tears the session down when it ends or is
    /// dropped.
    Streaming(SessionStream),
}

impl Reply {
    /// The fixed envelope for failures that escaped the session.
    pub fn internal_error() -> Self {
        Self::Immediate {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Some(serde_json::to_value(JsonRpcResponse::internal_error()).unwrap_or_default()),
        }
    }
}

/// Runs one session per request.
#[derive(Clone)]
pub struct Supervisor {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    factory: RegistryFactory,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
        factory: RegistryFactory,
    ) -> Self {
        Self {
            config,
            metrics,
            shutdown,
            factory,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Build a session, run the exchange, and arrange its teardown.
    ///
    /// Dropping the returned future before it resolves (the client went away
    /// mid-call) tears the session down as aborted.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tokio_util::sync::CancellationToken;
    /// use genai_mcp_server::config::Config;
    /// use genai_mcp_server::http::accept::AcceptSet;
    /// use genai_mcp_server::mcp::handler::ToolRegistry;
    /// use genai_mcp_server::mcp::lifecycle::{RegistryFactory, Reply, Supervisor};
    /// use genai_mcp_server::mcp::session::SessionRequest;
    /// use genai_mcp_server::metrics::Metrics;
    ///
    /// # tokio_test::block_on(async {
    /// let factory: RegistryFactory = Arc::new(|_config: &Config| Ok(ToolRegistry::new()));
    /// let supervisor = Supervisor::new(
    ///     Arc::new(Config::default()),
    ///     Metrics::new(),
    ///     CancellationToken::new(),
    ///     factory,
    /// );
    ///
    /// let request = SessionRequest {
    ///     accept: AcceptSet::bidirectional(),
    ///     body: Some(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.into()),
    /// };
    /// let Reply::Immediate { body, .. } = supervisor.serve(request).await else {
    ///     panic!("expected immediate reply");
    /// };
    /// assert_eq!(body.unwrap()["id"], 1);
    /// assert_eq!(supervisor.metrics().snapshot().active_sessions, 0);
    /// # });
    /// ```
    pub async fn serve(&self, request: SessionRequest) -> Reply {
        let registry = match (self.factory)(&self.config) {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                error!("Failed to build tool registry: {}", e);
                return Reply::internal_error();
            }
        };

        let session = Session::new(
            registry,
            Arc::new(HttpTransport::new()),
            self.metrics.clone(),
            SessionOptions {
                stream_responses: self.config.stream_responses,
            },
        );
        self.metrics.session_opened();
        let teardown = Teardown::new(&session, self.metrics.clone());
        let guard = TeardownGuard::new(teardown.clone());
        debug!(session_id = %session.id(), "Session opened");

        let output = match AssertUnwindSafe(session.run(request)).catch_unwind().await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(session_id = %session.id(), "Session failed: {}", e);
                teardown.run(Outcome::Failed);
                return Reply::internal_error();
            }
            Err(panic) => {
                error!(session_id = %session.id(), "Session panicked: {}", panic_message(&*panic));
                teardown.run(Outcome::Failed);
                return Reply::internal_error();
            }
        };

        match output {
            SessionOutput::Immediate { status, body } => {
                teardown.run(Outcome::Completed);
                Reply::Immediate { status, body }
            }
            SessionOutput::Streaming { events, driver } => {
                if let Some(driver) = driver {
                    spawn_driver(driver, &session, teardown.clone());
                }
                self.watch_shutdown(&session);
                guard.disarm();
                Reply::Streaming(SessionStream::new(events, teardown))
            }
        }
    }

    /// Close the session's transport when the process starts shutting down,
    /// which ends its stream and lets the server drain.
    fn watch_shutdown(&self, session: &Session) {
        let shutdown = self.shutdown.clone();
        let cancel = session.cancel_token();
        let transport = session.transport().clone();
        let session_id = session.id().to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(session_id = %session_id, "Closing stream for shutdown");
                    transport.close();
                }
                _ = cancel.cancelled() => {}
            }
        });
    }
}

/// Run a streaming session's dispatch in the background.
///
/// Stops early when the session is torn down. Errors and panics are reported
/// on the stream as the internal-error envelope before the session fails.
fn spawn_driver(driver: BoxFuture<'static, Result<()>>, session: &Session, teardown: Teardown) {
    let cancel = session.cancel_token();
    let transport = session.transport().clone();
    let session_id = session.id().to_string();

    tokio::spawn(async move {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = AssertUnwindSafe(driver).catch_unwind() => result,
        };

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("panicked: {}", panic_message(&*panic))),
        };

        if let Some(reason) = failure {
            warn!(session_id = %session_id, "Streamed dispatch failed: {}", reason);
            let _ = transport.send(JsonRpcResponse::internal_error()).await;
            teardown.run(Outcome::Failed);
        }
        transport.close();
    });
}

/// The single teardown routine for a session.
///
/// Cloned into every path that can end the session; only the first
/// [`Teardown::run`] has any effect.
#[derive(Clone)]
pub struct Teardown {
    inner: Arc<TeardownInner>,
}

struct TeardownInner {
    done: AtomicBool,
    session_id: String,
    state: StateCell,
    cancel: CancellationToken,
    transport: Arc<HttpTransport>,
    registry: Arc<ToolRegistry>,
    metrics: Arc<Metrics>,
}

impl Teardown {
    pub fn new(session: &Session, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(TeardownInner {
                done: AtomicBool::new(false),
                session_id: session.id().to_string(),
                state: session.state_cell(),
                cancel: session.cancel_token(),
                transport: session.transport().clone(),
                registry: session.registry().clone(),
                metrics,
            }),
        }
    }

    /// Release the session's resources. Returns `true` only for the call
    /// that actually tore it down.
    pub fn run(&self, outcome: Outcome) -> bool {
        let inner = &self.inner;
        if inner.done.swap(true, Ordering::AcqRel) {
            return false;
        }

        // A body that never parsed leaves the session in Negotiating.
        let state = inner.state.get();
        let outcome = match (outcome, state) {
            (Outcome::Completed, SessionState::Failed) => Outcome::Failed,
            _ => outcome,
        };
        if !(outcome == Outcome::Completed && state == SessionState::Negotiating) {
            inner.state.advance(outcome.terminal_state());
        }

        inner.cancel.cancel();
        inner.transport.close();
        inner.registry.close();
        inner.metrics.session_closed(outcome);

        info!(
            session_id = %inner.session_id,
            outcome = %outcome,
            state = %inner.state.get(),
            "Session closed"
        );
        true
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }
}

/// Aborts the session if dropped while still armed.
///
/// Held across [`Supervisor::serve`] so that a future dropped mid-exchange
/// still reaches teardown.
struct TeardownGuard {
    teardown: Option<Teardown>,
}

impl TeardownGuard {
    fn new(teardown: Teardown) -> Self {
        Self {
            teardown: Some(teardown),
        }
    }

    /// Hand responsibility for teardown to someone else.
    fn disarm(mut self) {
        self.teardown = None;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            if teardown.run(Outcome::Aborted) {
                debug!("Session dropped before its reply was ready");
            }
        }
    }
}

/// Response stream of a streaming session.
///
/// Ending normally tears the session down as completed; dropping it early
/// (the client disconnected) tears it down as aborted.
pub struct SessionStream {
    events: ReceiverStream<JsonRpcResponse>,
    teardown: Teardown,
}

impl SessionStream {
    fn new(events: mpsc::Receiver<JsonRpcResponse>, teardown: Teardown) -> Self {
        Self {
            events: ReceiverStream::new(events),
            teardown,
        }
    }
}

impl Stream for SessionStream {
    type Item = JsonRpcResponse;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.events).poll_next(cx) {
            Poll::Ready(None) => {
                this.teardown.run(Outcome::Completed);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.teardown.run(Outcome::Aborted);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Cancel `shutdown` on the first termination signal, then force the process
/// to exit with status 0 if it is still alive after [`SHUTDOWN_GRACE`].
pub fn spawn_signal_handler(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining sessions");
        shutdown.cancel();

        tokio::time::sleep(SHUTDOWN_GRACE).await;
        warn!("Sessions still open after {:?}, forcing exit", SHUTDOWN_GRACE);
        std::process::exit(0);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::accept::{AcceptSet, EVENT_STREAM};
    use crate::mcp::format::text_result;
    use crate::mcp::handler::{Arguments, ToolHandler};
    use crate::mcp::protocol::{Tool, ToolResult};
    use async_trait::async_trait;
    use axum::body::Bytes;
    use futures::StreamExt;
    use serde_json::json;

    struct PanickingTool;

    #[async_trait]
    impl ToolHandler for PanickingTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "explode".to_string(),
                description: "Always panics".to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            }
        }

        async fn execute(&self, _args: Arguments) -> Result<ToolResult> {
            panic!("tool blew up");
        }
    }

    struct QuietTool;

    #[async_trait]
    impl ToolHandler for QuietTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "quiet".to_string(),
                description: "Returns a fixed text".to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            }
        }

        async fn execute(&self, _args: Arguments) -> Result<ToolResult> {
            Ok(text_result("ok"))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl ToolHandler for SlowTool {
        fn definition(&self) -> Tool {
            Tool {
                name: "slow".to_string(),
                description: "Sleeps before answering".to_string(),
                input_schema: json!({ "type": "object", "properties": {} }),
            }
        }

        async fn execute(&self, _args: Arguments) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(text_result("late"))
        }
    }

    fn supervisor(config: Config) -> Supervisor {
        let factory: RegistryFactory = Arc::new(|_config: &Config| {
            let mut registry = ToolRegistry::new();
            registry.register(QuietTool);
            registry.register(PanickingTool);
            registry.register(SlowTool);
            Ok(registry)
        });
        Supervisor::new(
            Arc::new(config),
            Metrics::new(),
            CancellationToken::new(),
            factory,
        )
    }

    fn call(tool: &str) -> SessionRequest {
        SessionRequest {
            accept: AcceptSet::bidirectional(),
            body: Some(Bytes::from(
                json!({
                    "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": { "name": tool, "arguments": {} }
                })
                .to_string(),
            )),
        }
    }

    fn stream_open() -> SessionRequest {
        SessionRequest {
            accept: AcceptSet::only(EVENT_STREAM),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_completed_teardown_runs_once() {
        let supervisor = supervisor(Config::default());
        let reply = supervisor.serve(call("quiet")).await;

        let Reply::Immediate { status, body } = reply else {
            panic!("expected immediate reply");
        };
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["result"]["content"][0]["text"], "ok");

        let s = supervisor.metrics().snapshot();
        assert_eq!(s.sessions_opened, 1);
        assert_eq!(s.sessions_completed, 1);
        assert_eq!(s.sessions_closed(), 1);
        assert_eq!(s.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let supervisor = supervisor(Config::default());
        let reply = supervisor.serve(call("explode")).await;

        let Reply::Immediate { status, body } = reply else {
            panic!("expected immediate reply");
        };
        let body = body.unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], -32603);
        assert_eq!(body["error"]["message"], "Internal server error");
        assert!(body["id"].is_null());

        let s = supervisor.metrics().snapshot();
        assert_eq!(s.sessions_failed, 1);
        assert_eq!(s.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_factory_failure_is_internal_error() {
        let factory: RegistryFactory =
            Arc::new(|_config: &Config| Err(crate::Error::Config("bad".to_string())));
        let supervisor = Supervisor::new(
            Arc::new(Config::default()),
            Metrics::new(),
            CancellationToken::new(),
            factory,
        );

        let Reply::Immediate { status, .. } = supervisor.serve(call("quiet")).await else {
            panic!("expected immediate reply");
        };
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(supervisor.metrics().snapshot().sessions_opened, 0);
    }

    #[tokio::test]
    async fn test_dropped_stream_aborts() {
        let supervisor = supervisor(Config::default());
        let Reply::Streaming(stream) = supervisor.serve(stream_open()).await else {
            panic!("expected stream");
        };

        assert_eq!(supervisor.metrics().snapshot().active_sessions, 1);
        drop(stream);

        let s = supervisor.metrics().snapshot();
        assert_eq!(s.sessions_aborted, 1);
        assert_eq!(s.sessions_closed(), 1);
        assert_eq!(s.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_dropped_call_aborts_once() {
        let supervisor = supervisor(Config::default());

        let served =
            tokio::time::timeout(Duration::from_millis(100), supervisor.serve(call("slow"))).await;
        assert!(served.is_err());

        let s = supervisor.metrics().snapshot();
        assert_eq!(s.sessions_opened, 1);
        assert_eq!(s.sessions_aborted, 1);
        assert_eq!(s.sessions_closed(), 1);
        assert_eq!(s.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_failed_dispatch_counts_as_failed() {
        let supervisor = supervisor(Config::default());
        let Reply::Immediate { status, body } = supervisor.serve(call("missing")).await else {
            panic!("expected immediate reply");
        };
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["error"]["code"], -32602);

        let s = supervisor.metrics().snapshot();
        assert_eq!(s.sessions_failed, 1);
        assert_eq!(s.sessions_completed, 0);
        assert_eq!(s.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_open_stream() {
        let shutdown = CancellationToken::new();
        let factory: RegistryFactory = Arc::new(|_config: &Config| Ok(ToolRegistry::new()));
        let supervisor = Supervisor::new(
            Arc::new(Config::default()),
            Metrics::new(),
            shutdown.clone(),
            factory,
        );

        let Reply::Streaming(mut stream) = supervisor.serve(stream_open()).await else {
            panic!("expected stream");
        };

        shutdown.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());

        drop(stream);
        let s = supervisor.metrics().snapshot();
        assert_eq!(s.sessions_completed, 1);
        assert_eq!(s.sessions_aborted, 0);
    }

    #[tokio::test]
    async fn test_streamed_panic_reports_internal_error() {
        let supervisor = supervisor(Config {
            stream_responses: true,
            ..Config::default()
        });

        let Reply::Streaming(mut stream) = supervisor.serve(call("explode")).await else {
            panic!("expected stream");
        };

        let first = stream.next().await.unwrap();
        assert_eq!(first.error.unwrap().code, -32603);
        assert!(stream.next().await.is_none());
        drop(stream);

        let s = supervisor.metrics().snapshot();
        assert_eq!(s.sessions_failed, 1);
        assert_eq!(s.sessions_closed(), 1);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let session = Session::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(HttpTransport::new()),
            Metrics::new(),
            SessionOptions::default(),
        );
        let metrics = Metrics::new();
        let teardown = Teardown::new(&session, metrics.clone());

        assert!(teardown.run(Outcome::Aborted));
        assert!(!teardown.run(Outcome::Completed));
        assert!(teardown.is_done());
        assert!(session.registry().is_closed());
        assert!(session.transport().is_closed());
        assert!(session.cancel_token().is_cancelled());
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(metrics.snapshot().sessions_closed(), 1);
    }

    #[test]
    fn test_completion_after_failed_dispatch_is_failed() {
        let session = Session::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(HttpTransport::new()),
            Metrics::new(),
            SessionOptions::default(),
        );
        session.state_cell().advance(SessionState::Failed);
        let metrics = Metrics::new();

        assert!(Teardown::new(&session, metrics.clone()).run(Outcome::Completed));
        let s = metrics.snapshot();
        assert_eq!(s.sessions_failed, 1);
        assert_eq!(s.sessions_completed, 0);
    }
}
