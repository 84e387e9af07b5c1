//! Request-scoped protocol session.
//!
//! A session owns one transport and one tool registry for the duration of a
//! single HTTP request. It decides once whether the exchange is answered with
//! a JSON document or an event stream, dispatches every inbound message in
//! order, and reports its progress through [`SessionState`].

use axum::body::Bytes;
use axum::http::StatusCode;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::http::accept::{AcceptSet, EVENT_STREAM};
use crate::mcp::format::upstream_error_result;
use crate::mcp::handler::ToolRegistry;
use crate::mcp::protocol::*;
use crate::mcp::transport::{HttpTransport, Transport};
use crate::metrics::Metrics;
use crate::{SERVER_NAME, VERSION};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Negotiating,
    Dispatching,
    Completed,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Negotiating => "negotiating",
            Self::Dispatching => "dispatching",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// How a session ended, as seen by whoever tears it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Output fully delivered.
    Completed,
    /// An error or panic escaped the exchange.
    Failed,
    /// The client went away before the output was delivered.
    Aborted,
}

impl Outcome {
    /// The terminal state this outcome moves a still-running session to.
    pub fn terminal_state(self) -> SessionState {
        match self {
            Self::Completed => SessionState::Completed,
            Self::Failed => SessionState::Failed,
            Self::Aborted => SessionState::Aborted,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.terminal_state(), f)
    }
}

/// Shared, monotonic session state. Terminal states are never left.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<Mutex<SessionState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(SessionState::Created)))
    }

    pub fn get(&self) -> SessionState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `next` unless already terminal. Returns whether it moved.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }
}

/// Whether the exchange is answered at once or as an event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Immediate,
    Streaming,
}

/// An inbound request after header normalization.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Effective `Accept` set.
    pub accept: AcceptSet,
    /// Raw body, absent for a stream-open request.
    pub body: Option<Bytes>,
}

/// What a session hands back to the HTTP layer.
pub enum SessionOutput {
    /// A materialized reply. `body` is `None` for `202 Accepted`.
    Immediate {
        status: StatusCode,
        body: Option<Value>,
    },
    /// A live stream of responses. When present, `driver` produces the
    /// responses and must be polled for the stream to make progress.
    Streaming {
        events: mpsc::Receiver<JsonRpcResponse>,
        driver: Option<BoxFuture<'static, Result<()>>>,
    },
}

impl fmt::Debug for SessionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate { status, body } => f
                .debug_struct("Immediate")
                .field("status", status)
                .field("body", body)
                .finish(),
            Self::Streaming { driver, .. } => f
                .debug_struct("Streaming")
                .field("driven", &driver.is_some())
                .finish(),
        }
    }
}

/// Session settings taken from the configuration snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Answer body-carrying requests with an event stream.
    pub stream_responses: bool,
}

/// Parsed request body.
struct Batch {
    is_batch: bool,
    entries: Vec<std::result::Result<Message, JsonRpcResponse>>,
}

/// One protocol session.
#[derive(Clone)]
pub struct Session {
    id: String,
    registry: Arc<ToolRegistry>,
    transport: Arc<HttpTransport>,
    state: StateCell,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
    options: SessionOptions,
}

impl Session {
    /// Attach a fresh registry and transport.
    pub fn new(
        registry: Arc<ToolRegistry>,
        transport: Arc<HttpTransport>,
        metrics: Arc<Metrics>,
        options: SessionOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            registry,
            transport,
            state: StateCell::new(),
            cancel: CancellationToken::new(),
            metrics,
            options,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Cancelled when the session is torn down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    /// Decide the response mode from the normalized request.
    pub fn negotiate(&self, request: &SessionRequest) -> ResponseMode {
        self.state.advance(SessionState::Negotiating);

        let mode = match request.body {
            None => ResponseMode::Streaming,
            Some(_) if self.options.stream_responses && request.accept.contains(EVENT_STREAM) => {
                ResponseMode::Streaming
            }
            Some(_) => ResponseMode::Immediate,
        };
        debug!(session_id = %self.id, accept = %request.accept, ?mode, "Negotiated response mode");
        mode
    }

    /// Run the exchange for one request.
    pub async fn run(&self, request: SessionRequest) -> Result<SessionOutput> {
        let mode = self.negotiate(&request);

        let Some(body) = request.body else {
            let events = self.transport.open_stream()?;
            self.state.advance(SessionState::Dispatching);
            info!(session_id = %self.id, "Event stream opened");
            return Ok(SessionOutput::Streaming {
                events,
                driver: None,
            });
        };

        let batch = match parse_body(&body) {
            Ok(batch) => batch,
            Err(response) => {
                warn!(session_id = %self.id, "Rejecting unparseable request body");
                self.metrics.inc_protocol_errors();
                return Ok(SessionOutput::Immediate {
                    status: StatusCode::BAD_REQUEST,
                    body: Some(serde_json::to_value(response)?),
                });
            }
        };

        self.state.advance(SessionState::Dispatching);

        let needs_reply = batch
            .entries
            .iter()
            .any(|entry| entry.as_ref().map_or(true, Message::expects_response));
        if !needs_reply {
            self.dispatch(batch.entries).await?;
            return Ok(SessionOutput::Immediate {
                status: StatusCode::ACCEPTED,
                body: None,
            });
        }

        match mode {
            ResponseMode::Immediate => {
                self.dispatch(batch.entries).await?;
                let mut responses = self.transport.take_buffered();
                let body = if batch.is_batch {
                    serde_json::to_value(responses)?
                } else {
                    match responses.pop() {
                        Some(response) => serde_json::to_value(response)?,
                        None => {
                            return Err(Error::Internal(
                                "request produced no response".to_string(),
                            ))
                        }
                    }
                };
                Ok(SessionOutput::Immediate {
                    status: StatusCode::OK,
                    body: Some(body),
                })
            }
            ResponseMode::Streaming => {
                let events = self.transport.open_stream()?;
                let session = self.clone();
                let driver = async move {
                    session.dispatch(batch.entries).await?;
                    session.transport.close();
                    Ok(())
                }
                .boxed();
                Ok(SessionOutput::Streaming {
                    events,
                    driver: Some(driver),
                })
            }
        }
    }

    /// Handle every message in arrival order, sending one response per
    /// request through the transport.
    async fn dispatch(&self, entries: Vec<std::result::Result<Message, JsonRpcResponse>>) -> Result<()> {
        let mut failed = false;

        for entry in entries {
            let response = match entry {
                Ok(Message::Request(req)) => self.handle_request(req).await,
                Ok(Message::Notification(notif)) => {
                    self.handle_notification(notif);
                    continue;
                }
                Ok(Message::Response(resp)) => {
                    warn!(session_id = %self.id, "Ignoring client response for id {:?}", resp.id);
                    continue;
                }
                Err(invalid) => invalid,
            };

            if response.is_error() {
                failed = true;
                self.metrics.inc_protocol_errors();
            }
            self.transport.send(response).await?;
        }

        self.state.advance(if failed {
            SessionState::Failed
        } else {
            SessionState::Completed
        });
        Ok(())
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        debug!(session_id = %self.id, "Handling request: {} (id: {:?})", req.method, req.id);

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(req.params),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(req.params).await,
            _ => {
                return JsonRpcResponse::failure(
                    Some(req.id),
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", req.method),
                )
            }
        };

        match result {
            Ok(value) => JsonRpcResponse::success(req.id, value),
            Err(e) if e.is_validation() => {
                JsonRpcResponse::failure(Some(req.id), error_codes::INVALID_PARAMS, e.to_string())
            }
            Err(e) => {
                JsonRpcResponse::failure(Some(req.id), error_codes::INTERNAL_ERROR, e.to_string())
            }
        }
    }

    /// Handle a notification.
    fn handle_notification(&self, notif: JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => info!(session_id = %self.id, "Client initialized"),
            "notifications/cancelled" => {
                debug!(session_id = %self.id, "Cancellation notice ignored: requests are answered in-line")
            }
            _ => debug!(session_id = %self.id, "Unknown notification: {}", notif.method),
        }
    }

    /// Handle initialize request.
    fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        let requested = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str);

        let result = InitializeResult {
            protocol_version: negotiate_protocol_version(requested).to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
                logging: None,
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: VERSION.to_string(),
            },
        };

        Ok(serde_json::to_value(result)?)
    }

    /// Handle list tools request.
    fn handle_list_tools(&self) -> Result<Value> {
        let result = ListToolsResult {
            tools: self.registry.list_tools(),
        };
        Ok(serde_json::to_value(result)?)
    }

    /// Handle call tool request.
    ///
    /// Unknown tools and invalid arguments propagate as validation errors;
    /// failures inside the tool become an `isError` result.
    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params: CallToolParams = params
            .ok_or_else(|| Error::InvalidToolArguments("Missing params".to_string()))
            .and_then(|v| {
                serde_json::from_value(v).map_err(|e| Error::InvalidToolArguments(e.to_string()))
            })?;

        let name = params.name.clone();
        let result = match self.registry.call(&name, params.into_arguments()).await {
            Ok(result) => result,
            Err(e) if e.is_validation() => return Err(e),
            Err(e @ Error::SessionClosed(_)) => return Err(e),
            Err(e) => upstream_error_result(&e),
        };

        self.metrics.inc_tool_calls();
        info!(session_id = %self.id, tool = %name, is_error = result.is_error, "Tool call finished");
        Ok(serde_json::to_value(result)?)
    }
}

/// Decode a request body into classified messages.
fn parse_body(body: &[u8]) -> std::result::Result<Batch, JsonRpcResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        JsonRpcResponse::failure(None, error_codes::PARSE_ERROR, format!("Parse error: {}", e))
    })?;

    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(JsonRpcResponse::failure(
                    None,
                    error_codes::INVALID_REQUEST,
                    "Invalid Request: empty batch",
                ));
            }
            Ok(Batch {
                is_batch: true,
                entries: items.into_iter().map(Message::classify).collect(),
            })
        }
        other => Ok(Batch {
            is_batch: false,
            entries: vec![Message::classify(other)],
        }),
    }
}
