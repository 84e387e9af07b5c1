//! Configuration management for the GenAI MCP Server.
//!
//! Configuration is read once at startup and shared read-only as an
//! `Arc<Config>` snapshot; every request builds its tools from it.

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3876;

/// Default Gemini Developer API endpoint.
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";

/// Default connpass API endpoint.
pub const DEFAULT_CONNPASS_API_URL: &str = "https://connpass.com/api/v2";

/// Command-line arguments for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "genai-mcp-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stateless MCP server for generative-AI and event-directory tools")]
pub struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// HTTP port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PORT")]
    pub port: u16,

    /// Enable debug logging
    #[arg(short, long, env = "MCP_DEBUG")]
    pub debug: bool,

    /// Log output format
    #[arg(long, default_value = "text", env = "MCP_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Answer POST requests with an event stream instead of a JSON document
    #[arg(long, env = "MCP_STREAM_RESPONSES")]
    pub stream_responses: bool,

    /// Gemini Developer API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Gemini Developer API base URL
    #[arg(long, default_value = DEFAULT_GEMINI_API_URL, env = "GEMINI_API_URL")]
    pub gemini_api_url: String,

    /// OAuth access token for Vertex AI
    #[arg(long, env = "VERTEX_ACCESS_TOKEN", hide_env_values = true)]
    pub vertex_access_token: Option<String>,

    /// Vertex AI base URL (defaults to the regional endpoint of the requested location)
    #[arg(long, env = "VERTEX_API_URL")]
    pub vertex_api_url: Option<String>,

    /// connpass API key
    #[arg(long, env = "CONNPASS_API_KEY", hide_env_values = true)]
    pub connpass_api_key: Option<String>,

    /// connpass API base URL
    #[arg(long, default_value = DEFAULT_CONNPASS_API_URL, env = "CONNPASS_API_URL")]
    pub connpass_api_url: String,

    /// Timeout for upstream HTTP calls, in seconds
    #[arg(long, default_value = "120", env = "MCP_UPSTREAM_TIMEOUT")]
    pub upstream_timeout: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Debug mode
    pub debug: bool,
    /// Log format
    pub log_format: LogFormat,
    /// POST replies as event streams
    pub stream_responses: bool,
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// Gemini API base URL
    pub gemini_api_url: String,
    /// Vertex AI access token
    pub vertex_access_token: Option<String>,
    /// Vertex AI base URL override
    pub vertex_api_url: Option<String>,
    /// connpass API key
    pub connpass_api_key: Option<String>,
    /// connpass API base URL
    pub connpass_api_url: String,
    /// Upstream HTTP timeout in seconds
    pub upstream_timeout: u64,
}

impl Config {
    /// The `host:port` pair to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Treat blank credential values the same as unset ones.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            debug: args.debug,
            log_format: args.log_format,
            stream_responses: args.stream_responses,
            gemini_api_key: non_empty(args.gemini_api_key),
            gemini_api_url: args.gemini_api_url,
            vertex_access_token: non_empty(args.vertex_access_token),
            vertex_api_url: non_empty(args.vertex_api_url),
            connpass_api_key: non_empty(args.connpass_api_key),
            connpass_api_url: args.connpass_api_url,
            upstream_timeout: args.upstream_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            debug: false,
            log_format: LogFormat::Text,
            stream_responses: false,
            gemini_api_key: None,
            gemini_api_url: DEFAULT_GEMINI_API_URL.to_string(),
            vertex_access_token: None,
            vertex_api_url: None,
            connpass_api_key: None,
            connpass_api_url: DEFAULT_CONNPASS_API_URL.to_string(),
            upstream_timeout: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.port, 3876);
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.debug);
        assert!(!config.stream_responses);
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.gemini_api_url, DEFAULT_GEMINI_API_URL);
        assert_eq!(config.connpass_api_url, DEFAULT_CONNPASS_API_URL);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_bind_addr() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_args_parse_defaults() {
        let args = Args::try_parse_from(["genai-mcp-server", "--port", "4000"]).unwrap();
        assert_eq!(args.port, 4000);
        assert_eq!(args.log_format, LogFormat::Text);
        assert!(!args.stream_responses);
    }

    #[test]
    fn test_args_to_config_drops_blank_credentials() {
        let args = Args::try_parse_from([
            "genai-mcp-server",
            "--gemini-api-key",
            "  ",
            "--connpass-api-key",
            "secret",
            "--log-format",
            "json",
        ])
        .unwrap();

        let config: Config = args.into();

        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.connpass_api_key.as_deref(), Some("secret"));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config {
            port: 8080,
            debug: true,
            ..Config::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"port\":8080"));
        assert!(json.contains("\"debug\":true"));
        assert!(json.contains("\"log_format\":\"text\""));
    }
}
