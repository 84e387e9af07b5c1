//! Tool handlers and the per-session tool registry.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::{ContentBlock, Tool, ToolResult};
use crate::mcp::schema::validate_arguments;

/// Tool arguments as received in `tools/call`.
pub type Arguments = Map<String, Value>;

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool with already validated arguments.
    async fn execute(&self, arguments: Arguments) -> Result<ToolResult>;
}

/// Ordered registry of tool handlers.
///
/// A registry belongs to exactly one session. Once closed it refuses further
/// calls; closing twice is a no-op.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolHandler>>,
    index: HashMap<String, usize>,
    closed: AtomicBool,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a tool handler.
    ///
    /// Names are unique: registering a name again replaces the earlier handler
    /// in its original position.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) {
        self.register_arc(Arc::new(handler));
    }

    /// Register a tool handler (Arc version).
    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.definition().name;
        match self.index.get(&name) {
            Some(&position) => {
                warn!("Tool {} registered twice, replacing earlier handler", name);
                self.tools[position] = handler;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(handler);
            }
        }
    }

    /// Get all registered tools in registration order.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|h| h.definition()).collect()
    }

    /// Get a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    /// Check if a tool exists.
    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get the number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Validate the arguments against the tool's schema and run it.
    ///
    /// Unknown tools and schema violations fail before any handler code runs.
    pub async fn call(&self, name: &str, arguments: Arguments) -> Result<ToolResult> {
        if self.is_closed() {
            return Err(Error::SessionClosed(format!("tool registry closed before calling {}", name)));
        }

        let handler = self
            .get_tool(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        let definition = handler.definition();
        validate_arguments(&definition.input_schema, &arguments).map_err(|violation| {
            Error::InvalidToolArguments(format!("{}: {}", name, violation))
        })?;

        debug!(tool = name, "Executing tool");
        handler.execute(arguments).await
    }

    /// Close the registry. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Whether the registry has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper macro for creating tool input schemas.
#[macro_export]
macro_rules! tool_schema {
    (required: [$($req:expr),* $(,)?], $($json:tt)+) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)+
            },
            "required": [$($req),*]
        })
    };
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &Arguments, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidToolArguments(format!("Missing required argument: {}", name)))
}

/// Helper to extract an optional string argument.
pub fn get_optional_string_arg(args: &Arguments, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(String::from)
}

/// Helper to extract an optional integer argument.
pub fn get_optional_int_arg(args: &Arguments, name: &str) -> Option<i64> {
    args.get(name).and_then(|v| v.as_i64())
}

/// Helper to deserialize a nested argument object.
pub fn get_object_arg<T: serde::de::DeserializeOwned>(args: &Arguments, name: &str) -> Result<T> {
    let value = args
        .get(name)
        .cloned()
        .ok_or_else(|| Error::InvalidToolArguments(format!("Missing required argument: {}", name)))?;
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidToolArguments(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::format::text_result;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct TestTool {
        name: String,
        calls: Arc<AtomicUsize>,
    }

    impl TestTool {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ToolHandler for TestTool {
        fn definition(&self) -> Tool {
            Tool {
                name: self.name.clone(),
                description: format!("Test tool: {}", self.name),
                input_schema: crate::tool_schema!(required: ["input"],
                    "input": { "type": "string" }
                ),
            }
        }

        async fn execute(&self, args: Arguments) -> Result<ToolResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let input = get_string_arg(&args, "input")?;
            Ok(text_result(format!("Executed {} with: {}", self.name, input)))
        }
    }

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_registry_registration() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool::new("test_tool"));

        assert_eq!(registry.tool_count(), 1);
        assert!(registry.has_tool("test_tool"));
        assert!(!registry.has_tool("nonexistent"));
    }

    #[test]
    fn test_registry_preserves_order() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool::new("zeta"));
        registry.register(TestTool::new("alpha"));
        registry.register(TestTool::new("mid"));

        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_duplicate_name_replaces_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool::new("a"));
        registry.register(TestTool::new("b"));
        registry.register(TestTool::new("a"));

        assert_eq!(registry.tool_count(), 2);
        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_call_executes_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool::new("echo"));

        let result = registry.call("echo", args(json!({"input": "hello"}))).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("Executed echo with: hello"));
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(ref name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_call_rejects_invalid_arguments_without_running() {
        let tool = TestTool::new("echo");
        let calls = tool.calls.clone();
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let err = registry.call("echo", args(json!({"input": 5}))).await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("echo: input"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_calls() {
        let mut registry = ToolRegistry::new();
        registry.register(TestTool::new("echo"));

        assert!(registry.close());
        assert!(!registry.close());
        assert!(registry.is_closed());

        let err = registry.call("echo", args(json!({"input": "x"}))).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed(_)));
    }

    #[test]
    fn test_get_string_arg() {
        let args = args(json!({"name": "value"}));

        assert_eq!(get_string_arg(&args, "name").unwrap(), "value");
        assert!(get_string_arg(&args, "missing").is_err());
        assert_eq!(get_optional_string_arg(&args, "missing"), None);
    }

    #[test]
    fn test_get_object_arg() {
        #[derive(serde::Deserialize)]
        struct Opts {
            model: String,
        }

        let args = args(json!({"options": {"model": "gemini"}, "bad": 3}));
        let opts: Opts = get_object_arg(&args, "options").unwrap();
        assert_eq!(opts.model, "gemini");
        assert!(get_object_arg::<Opts>(&args, "bad").is_err());
        assert_eq!(get_optional_int_arg(&args, "bad"), Some(3));
    }
}
