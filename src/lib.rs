//! GenAI MCP Server
//!
//! A stateless Model Context Protocol (MCP) server that exposes
//! generative-AI and event-directory tools over JSON-RPC on HTTP.
//!
//! # Architecture
//!
//! 1. **HTTP Layer** (`http`) - Routes, `Accept` widening, JSON and SSE replies
//! 2. **MCP Layer** (`mcp`) - Protocol types, per-request sessions, supervision
//! 3. **Tools Layer** (`tools`) - Greeting, Gemini/Vertex AI, connpass tools
//! 4. **SDK Layer** (`sdk`) - Upstream API clients
//!
//! Every request gets its own tool registry and transport, built from an
//! immutable [`config::Config`] snapshot, and is torn down exactly once when
//! its output is delivered, it fails, or the client disconnects.

pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod metrics;
pub mod sdk;
pub mod tools;

pub use error::{Error, Result};

/// Server version reported in `initialize`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name reported in `initialize`.
pub const SERVER_NAME: &str = "GenAI MCP Server";
