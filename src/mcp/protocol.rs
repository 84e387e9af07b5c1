//! MCP protocol types and message definitions.
//!
//! Based on the Model Context Protocol specification.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// JSON-RPC version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Latest MCP protocol version.
pub const MCP_VERSION: &str = "2025-03-26";

/// Protocol versions this server can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05", "2024-10-07"];

// ===== JSON-RPC Base Types =====

/// A JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC response.
///
/// `id` is `null` when the request it answers could not be identified,
/// e.g. after a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// A success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// A failure response.
    pub fn failure(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// The fixed envelope returned with HTTP 500 when an exchange blows up.
    pub fn internal_error() -> Self {
        Self::failure(None, error_codes::INTERNAL_ERROR, "Internal server error")
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A JSON-RPC notification (no id, no response expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID (can be string or number).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

/// One inbound JSON-RPC message after classification.
#[derive(Debug, Clone)]
pub enum Message {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    /// A response sent by the client; the server never issues requests, so
    /// these are dropped.
    Response(JsonRpcResponse),
}

impl Message {
    /// Classify a decoded JSON value.
    ///
    /// A message is a request when it carries a string or numeric `id` and a
    /// `method`; a `method` without an `id` (or with a `null` one) is a
    /// notification. Anything else is answered with the returned
    /// `-32600` response.
    pub fn classify(value: Value) -> std::result::Result<Self, JsonRpcResponse> {
        let Value::Object(obj) = value else {
            return Err(invalid_request(None, "Message must be a JSON object"));
        };

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(raw) => match serde_json::from_value::<RequestId>(raw.clone()) {
                Ok(id) => Some(id),
                Err(_) => return Err(invalid_request(None, "Invalid id: must be a string or integer")),
            },
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(invalid_request(id, "jsonrpc must be \"2.0\""));
        }

        if let Some(method) = obj.get("method") {
            let Some(method) = method.as_str() else {
                return Err(invalid_request(id, "method must be a string"));
            };
            let params = obj.get("params").cloned();
            return Ok(match id {
                Some(id) => Message::Request(JsonRpcRequest {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    method: method.to_string(),
                    params,
                }),
                None => Message::Notification(JsonRpcNotification {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method: method.to_string(),
                    params,
                }),
            });
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            return serde_json::from_value::<JsonRpcResponse>(Value::Object(obj))
                .map(Message::Response)
                .map_err(|e| invalid_request(None, e.to_string()));
        }

        Err(invalid_request(id, "Message has neither method, result nor error"))
    }

    /// Whether the sender expects an answer.
    pub fn expects_response(&self) -> bool {
        matches!(self, Message::Request(_))
    }
}

fn invalid_request(id: Option<RequestId>, message: impl Into<String>) -> JsonRpcResponse {
    JsonRpcResponse::failure(
        id,
        error_codes::INVALID_REQUEST,
        format!("Invalid Request: {}", message.into()),
    )
}

// ===== MCP-Specific Types =====

/// Server capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
}

/// Tools capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

/// Logging capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingCapability {}

/// Server info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Initialize result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// Pick the protocol version to answer an `initialize` with.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|r| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|v| **v == r))
        .copied()
        .unwrap_or(MCP_VERSION)
}

/// Tool definition as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Tool call result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
    /// Present only for results produced by a web-grounded generation.
    #[serde(flatten)]
    pub grounding: Option<Grounding>,
}

impl ToolResult {
    /// Text of the first text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
        })
    }
}

/// Citation metadata attached to a grounded result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grounding {
    pub web_search_queries: Vec<String>,
    pub grounding_chunks: Vec<GroundingSource>,
}

impl Grounding {
    pub fn is_empty(&self) -> bool {
        self.web_search_queries.is_empty() && self.grounding_chunks.is_empty()
    }
}

/// One web source cited by a grounded result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

/// Content block in a tool result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

// `kind` mirrors `type` for clients that read the discriminator under that name.
impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ContentBlock::Text { text } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "text")?;
                map.serialize_entry("kind", "text")?;
                map.serialize_entry("text", text)?;
                map.end()
            }
        }
    }
}

/// List tools result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Call tool params.
///
/// Arguments normally travel under `arguments`; when that key is absent the
/// remaining top-level fields are taken as the arguments instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallToolParams {
    /// The effective argument object.
    pub fn into_arguments(self) -> Map<String, Value> {
        match self.arguments {
            Some(arguments) => arguments,
            None => self
                .extra
                .into_iter()
                .filter(|(key, _)| key != "_meta")
                .collect(),
        }
    }
}

// ===== Error Codes =====

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}
