//! HTTP client for the Gemini Developer API and Vertex AI.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::sdk::types::{GenerateContentRequest, GenerateContentResponse, GoogleErrorBody};
use crate::VERSION;

/// User agent string for upstream requests.
pub(crate) fn user_agent() -> String {
    format!("genai-mcp-server/{} (rust)", VERSION)
}

/// Which backend serves a generation and how to authenticate against it.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Gemini Developer API, authenticated with an API key.
    Developer { api_key: String },
    /// Vertex AI, authenticated with an OAuth access token.
    Vertex {
        project: String,
        location: String,
        access_token: String,
    },
}

/// A fully resolved model to call.
#[derive(Debug, Clone)]
pub struct ModelTarget {
    pub backend: Backend,
    pub model: String,
    pub api_version: String,
}

/// Client for `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    developer_url: String,
    vertex_url: Option<String>,
}

impl GeminiClient {
    /// Create a client from the configuration snapshot.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_secs(config.upstream_timeout))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            developer_url: config.gemini_api_url.trim_end_matches('/').to_string(),
            vertex_url: config
                .vertex_api_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    /// The `generateContent` URL for a target.
    pub fn model_url(&self, target: &ModelTarget) -> String {
        match &target.backend {
            Backend::Developer { .. } => {
                let model = target.model.trim_start_matches("models/");
                format!(
                    "{}/{}/models/{}:generateContent",
                    self.developer_url, target.api_version, model
                )
            }
            Backend::Vertex {
                project, location, ..
            } => {
                let base = self
                    .vertex_url
                    .clone()
                    .unwrap_or_else(|| format!("https://{}-aiplatform.googleapis.com", location));
                let resource = if target.model.starts_with("projects/") {
                    target.model.clone()
                } else if target.model.starts_with("publishers/") {
                    format!("projects/{}/locations/{}/{}", project, location, target.model)
                } else {
                    format!(
                        "projects/{}/locations/{}/publishers/google/models/{}",
                        project, location, target.model
                    )
                };
                format!("{}/{}/{}:generateContent", base, target.api_version, resource)
            }
        }
    }

    /// Generate content.
    pub async fn generate_content(
        &self,
        target: &ModelTarget,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = self.model_url(target);
        debug!("POST {}", url);

        let builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(request);

        let builder = match &target.backend {
            Backend::Developer { api_key } => builder.header("x-goog-api-key", api_key),
            Backend::Vertex { access_token, .. } => {
                builder.header("Authorization", format!("Bearer {}", access_token))
            }
        };

        let response = builder.send().await?;
        handle_response(response).await
    }
}

/// Turn an upstream response into a typed body or an `Error::Api`.
pub(crate) async fn handle_response<R: DeserializeOwned>(response: Response) -> Result<R> {
    let status = response.status();

    if !status.is_success() {
        let status_text = status.canonical_reason().unwrap_or("Unknown");
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GoogleErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or(body);
        return Err(Error::api(status.as_u16(), status_text, message));
    }

    response
        .json()
        .await
        .map_err(|e| Error::UpstreamResponse(format!("Failed to parse response: {}", e)))
}
