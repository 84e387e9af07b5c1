//! Generative-AI tools backed by Gemini and Vertex AI.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mcp::format::{error_result, grounded_result, text_result, upstream_error_result};
use crate::mcp::handler::{get_object_arg, get_string_arg, Arguments, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::sdk::gemini::{Backend, GeminiClient, ModelTarget};
use crate::sdk::types::GenerateContentRequest;

/// API version used by `call_gemini_or_vertex_ai` unless overridden.
pub const DEFAULT_API_VERSION: &str = "v1";

/// API version used by `call_google_search` unless overridden.
pub const SEARCH_API_VERSION: &str = "v1beta";

/// Model used by `call_gemini`.
pub const LEGACY_MODEL: &str = "gemini-pro";

const EMPTY_MESSAGE: &str = "User message cannot be empty.";

/// Per-call model options.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenAiOptions {
    #[serde(rename = "useVertexAI")]
    pub use_vertex_ai: bool,
    pub model: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Credentials for the generation backends, taken from the config snapshot.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub vertex_access_token: Option<String>,
}

impl Credentials {
    pub fn from_config(config: &Config) -> Self {
        Self {
            gemini_api_key: config.gemini_api_key.clone(),
            vertex_access_token: config.vertex_access_token.clone(),
        }
    }

    fn gemini_key(&self) -> Result<&str> {
        self.gemini_api_key.as_deref().ok_or_else(|| {
            Error::MissingCredential("GEMINI_API_KEY is required for Developer API mode".to_string())
        })
    }
}

/// Outcome of checking a call's options before any network traffic.
enum Resolved {
    Target(ModelTarget),
    Rejected(&'static str),
}

/// Turn the caller's options into a concrete target.
fn resolve(credentials: &Credentials, options: &GenAiOptions, default_version: &str) -> Result<Resolved> {
    let api_version = options
        .api_version
        .clone()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_version.to_string());

    let backend = if options.use_vertex_ai {
        let (Some(project), Some(location)) = (
            options.project.clone().filter(|p| !p.trim().is_empty()),
            options.location.clone().filter(|l| !l.trim().is_empty()),
        ) else {
            return Ok(Resolved::Rejected(
                "Project and location are required for Vertex AI mode.",
            ));
        };
        let access_token = credentials.vertex_access_token.clone().ok_or_else(|| {
            Error::MissingCredential("VERTEX_ACCESS_TOKEN is required for Vertex AI mode".to_string())
        })?;
        Backend::Vertex {
            project,
            location,
            access_token,
        }
    } else {
        Backend::Developer {
            api_key: credentials.gemini_key()?.to_string(),
        }
    };

    Ok(Resolved::Target(ModelTarget {
        backend,
        model: options.model.clone(),
        api_version,
    }))
}

fn options_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "description": "Options for configuring the AI call.",
        "properties": {
            "useVertexAI": {
                "type": "boolean",
                "description": "Set to true to use Vertex AI, false for Gemini Developer API."
            },
            "model": {
                "type": "string",
                "description": "The model name (e.g., 'gemini-1.5-flash-001') or full model path for Vertex AI."
            },
            "project": {
                "type": "string",
                "description": "Google Cloud Project ID (required if useVertexAI is true)."
            },
            "location": {
                "type": "string",
                "description": "Google Cloud Project Location (required if useVertexAI is true)."
            },
            "apiVersion": {
                "type": "string",
                "description": "API version, e.g. 'v1', 'v1beta' or 'v1alpha'."
            }
        },
        "required": ["useVertexAI", "model"]
    })
}

fn message_and_options(args: &Arguments) -> Result<(String, GenAiOptions)> {
    let message = get_string_arg(args, "userMessage")?;
    let options: GenAiOptions = get_object_arg(args, "options")?;
    Ok((message, options))
}

/// Free-form generation on either backend.
pub struct GenAiTool {
    client: Arc<GeminiClient>,
    credentials: Credentials,
}

impl GenAiTool {
    pub fn new(client: Arc<GeminiClient>, credentials: Credentials) -> Self {
        Self { client, credentials }
    }
}

#[async_trait]
impl ToolHandler for GenAiTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "call_gemini_or_vertex_ai".to_string(),
            description: "Calls either the Gemini Developer API or Vertex AI with a user prompt and options.".to_string(),
            input_schema: crate::tool_schema!(required: ["userMessage", "options"],
                "userMessage": {
                    "type": "string",
                    "description": "The message/prompt to send to the Generative AI."
                },
                "options": options_schema()
            ),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let (message, options) = message_and_options(&args)?;
        if message.trim().is_empty() {
            return Ok(error_result(EMPTY_MESSAGE));
        }

        let target = match resolve(&self.credentials, &options, DEFAULT_API_VERSION)? {
            Resolved::Target(target) => target,
            Resolved::Rejected(reason) => return Ok(error_result(reason)),
        };

        debug!(model = %target.model, version = %target.api_version, "Generating content");
        let response = self
            .client
            .generate_content(&target, &GenerateContentRequest::user_prompt(message))
            .await?;

        let text = response.text();
        if text.is_empty() {
            return Err(Error::UpstreamResponse("Empty response from model".to_string()));
        }
        Ok(text_result(text))
    }
}

/// Generation grounded with Google Search, returned with its sources.
pub struct GoogleSearchTool {
    client: Arc<GeminiClient>,
    credentials: Credentials,
}

impl GoogleSearchTool {
    pub fn new(client: Arc<GeminiClient>, credentials: Credentials) -> Self {
        Self { client, credentials }
    }
}

#[async_trait]
impl ToolHandler for GoogleSearchTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "call_google_search".to_string(),
            description: "Answers a prompt with Gemini grounded in Google Search results, listing the queries and sources used.".to_string(),
            input_schema: crate::tool_schema!(required: ["userMessage", "options"],
                "userMessage": {
                    "type": "string",
                    "description": "The question to answer with web search."
                },
                "options": options_schema()
            ),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let (message, options) = message_and_options(&args)?;
        if message.trim().is_empty() {
            return Ok(error_result(EMPTY_MESSAGE));
        }

        let target = match resolve(&self.credentials, &options, SEARCH_API_VERSION)? {
            Resolved::Target(target) => target,
            Resolved::Rejected(reason) => return Ok(error_result(reason)),
        };

        let request = GenerateContentRequest::user_prompt(message).with_google_search();
        let response = self.client.generate_content(&target, &request).await?;
        Ok(grounded_result(&response))
    }
}

/// Single-model Gemini call on the Developer API.
pub struct GeminiTool {
    client: Arc<GeminiClient>,
    credentials: Credentials,
}

impl GeminiTool {
    pub fn new(client: Arc<GeminiClient>, credentials: Credentials) -> Self {
        Self { client, credentials }
    }
}

#[async_trait]
impl ToolHandler for GeminiTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "call_gemini".to_string(),
            description: "Sends a message to the Gemini API and returns its reply.".to_string(),
            input_schema: crate::tool_schema!(required: ["userMessage"],
                "userMessage": {
                    "type": "string",
                    "description": "The message to send to Gemini."
                }
            ),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let api_key = self.credentials.gemini_api_key.clone().ok_or_else(|| {
            Error::MissingCredential("GEMINI_API_KEY is not set".to_string())
        })?;

        let message = get_string_arg(&args, "userMessage")?;
        if message.trim().is_empty() {
            return Ok(error_result(EMPTY_MESSAGE));
        }

        let target = ModelTarget {
            backend: Backend::Developer { api_key },
            model: LEGACY_MODEL.to_string(),
            api_version: SEARCH_API_VERSION.to_string(),
        };

        let response = match self
            .client
            .generate_content(&target, &GenerateContentRequest::user_prompt(message))
            .await
        {
            Ok(response) => response,
            Err(Error::Api {
                status, message, ..
            }) => {
                warn!(status, "Gemini rejected the request");
                return Ok(upstream_error_result(&format!(
                    "Gemini API Error: {} - {}",
                    status, message
                )));
            }
            Err(e) => return Err(e),
        };

        let text = response.text();
        if text.is_empty() {
            return Err(Error::UpstreamResponse(
                "Gemini API returned an unexpected response structure".to_string(),
            ));
        }
        Ok(text_result(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: serde_json::Value) -> GenAiOptions {
        serde_json::from_value(value).unwrap()
    }

    fn with_key() -> Credentials {
        Credentials {
            gemini_api_key: Some("key".to_string()),
            vertex_access_token: Some("token".to_string()),
        }
    }

    #[test]
    fn test_options_field_names() {
        let opts = options(json!({
            "useVertexAI": true, "model": "m", "project": "p",
            "location": "us-central1", "apiVersion": "v1alpha"
        }));
        assert!(opts.use_vertex_ai);
        assert_eq!(opts.api_version.as_deref(), Some("v1alpha"));
    }

    #[test]
    fn test_resolve_defaults_api_version() {
        let opts = options(json!({ "useVertexAI": false, "model": "gemini-2.5-flash" }));
        let Resolved::Target(target) = resolve(&with_key(), &opts, DEFAULT_API_VERSION).unwrap() else {
            panic!("expected target");
        };
        assert_eq!(target.api_version, "v1");
        assert!(matches!(target.backend, Backend::Developer { .. }));
    }

    #[test]
    fn test_resolve_vertex_requires_project_and_location() {
        let opts = options(json!({ "useVertexAI": true, "model": "m", "project": "p" }));
        assert!(matches!(
            resolve(&with_key(), &opts, DEFAULT_API_VERSION).unwrap(),
            Resolved::Rejected(_)
        ));
    }

    #[test]
    fn test_resolve_missing_credentials() {
        let developer = options(json!({ "useVertexAI": false, "model": "m" }));
        let err = resolve(&Credentials::default(), &developer, DEFAULT_API_VERSION).err().unwrap();
        assert!(matches!(err, Error::MissingCredential(_)));

        let vertex = options(json!({
            "useVertexAI": true, "model": "m", "project": "p", "location": "l"
        }));
        let err = resolve(&Credentials::default(), &vertex, DEFAULT_API_VERSION).err().unwrap();
        assert!(err.to_string().contains("VERTEX_ACCESS_TOKEN"));
    }

    fn client() -> Arc<GeminiClient> {
        Arc::new(GeminiClient::new(&Config::default()).unwrap())
    }

    #[tokio::test]
    async fn test_empty_message_is_error_result() {
        let tool = GenAiTool::new(client(), with_key());
        let args = json!({ "userMessage": "  ", "options": { "useVertexAI": false, "model": "m" } });

        let result = tool.execute(args.as_object().cloned().unwrap()).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some(EMPTY_MESSAGE));
    }

    #[tokio::test]
    async fn test_call_gemini_without_key() {
        let tool = GeminiTool::new(client(), Credentials::default());
        let args = json!({ "userMessage": "hello" });

        let err = tool.execute(args.as_object().cloned().unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)));
        assert!(!err.is_validation());
    }
}
