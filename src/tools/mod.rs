//! MCP tool implementations.
//!
//! - `greeting` - Random greeting (1 tool)
//! - `genai` - Gemini / Vertex AI generation and search grounding (3 tools)
//! - `events` - connpass user events (2 tools)

pub mod events;
pub mod genai;
pub mod greeting;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::mcp::handler::ToolRegistry;
use crate::sdk::connpass::ConnpassClient;
use crate::sdk::gemini::GeminiClient;

/// Build a fresh registry holding every tool, in listing order.
pub fn build_registry(config: &Config) -> Result<ToolRegistry> {
    let gemini = Arc::new(GeminiClient::new(config)?);
    let connpass = Arc::new(ConnpassClient::new(config)?);
    let credentials = genai::Credentials::from_config(config);

    let mut registry = ToolRegistry::new();

    registry.register(greeting::RandomGreetingTool::new());

    // Generative AI tools (3)
    registry.register(genai::GenAiTool::new(gemini.clone(), credentials.clone()));
    registry.register(genai::GoogleSearchTool::new(gemini.clone(), credentials.clone()));
    registry.register(genai::GeminiTool::new(gemini, credentials));

    // Event directory tools (2)
    registry.register(events::UserEventsTool::attended(connpass.clone()));
    registry.register(events::UserEventsTool::presenter(connpass));

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order() {
        let registry = build_registry(&Config::default()).unwrap();
        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "get_random_greeting",
                "call_gemini_or_vertex_ai",
                "call_google_search",
                "call_gemini",
                "get_user_attended_events",
                "get_user_presenter_events",
            ]
        );
    }

    #[test]
    fn test_every_schema_is_an_object() {
        let registry = build_registry(&Config::default()).unwrap();
        for tool in registry.list_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert!(!tool.description.is_empty(), "{}", tool.name);
        }
    }
}
