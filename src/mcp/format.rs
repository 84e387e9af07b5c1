//! Response formatting: turning raw tool output into MCP content envelopes.

use std::fmt;
use tracing::{debug, error};

use crate::mcp::handler::text_content;
use crate::mcp::protocol::{Grounding, GroundingSource, ToolResult};
use crate::sdk::types::{GenerateContentResponse, GroundingMetadata};

/// First line of the citation block appended to grounded answers.
pub const CITATION_HEADER: &str = "--- Search Sources ---";

/// Wrap plain text as a successful result.
pub fn text_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: false,
        grounding: None,
    }
}

/// Wrap text as an error result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: true,
        grounding: None,
    }
}

/// Convert a failed upstream call into a user-visible error result.
pub fn upstream_error_result(err: &dyn fmt::Display) -> ToolResult {
    error!("Error processing API request: {}", err);
    error_result(format!(
        "An error occurred while retrieving information: {}\nPlease try again later.",
        err
    ))
}

/// Format a web-grounded generation.
///
/// The upstream text is kept verbatim; when the response carries search
/// queries or sources, a citation block is appended after it.
pub fn grounded_result(response: &GenerateContentResponse) -> ToolResult {
    let text = response.text();
    let grounding = grounding_from(response.grounding_metadata());

    debug!(
        text_len = text.len(),
        queries = grounding.web_search_queries.len(),
        chunks = grounding.grounding_chunks.len(),
        "Formatting grounded response"
    );

    let text = match citation_block(&grounding) {
        Some(block) => format!("{}{}", text, block),
        None => text,
    };

    ToolResult {
        content: vec![text_content(text)],
        is_error: false,
        grounding: Some(grounding),
    }
}

/// Extract queries and sources in upstream order.
pub fn grounding_from(metadata: Option<&GroundingMetadata>) -> Grounding {
    let Some(metadata) = metadata else {
        return Grounding::default();
    };

    Grounding {
        web_search_queries: metadata.web_search_queries.clone(),
        grounding_chunks: metadata
            .grounding_chunks
            .iter()
            .map(|chunk| GroundingSource {
                source_title: chunk.web.as_ref().and_then(|w| w.title.clone()),
                source_uri: chunk.web.as_ref().and_then(|w| w.uri.clone()),
            })
            .collect(),
    }
}

/// Render the citation block, or `None` when there is nothing to cite.
pub fn citation_block(grounding: &Grounding) -> Option<String> {
    if grounding.is_empty() {
        return None;
    }

    let mut block = format!("\n\n{}\n", CITATION_HEADER);

    if !grounding.web_search_queries.is_empty() {
        block.push_str(&format!(
            "Search queries: {}\n",
            grounding.web_search_queries.join(", ")
        ));
    }

    if !grounding.grounding_chunks.is_empty() {
        block.push_str(&format!("Sources: {}\n", grounding.grounding_chunks.len()));
        for (index, source) in grounding.grounding_chunks.iter().enumerate() {
            block.push_str(&format!(
                "{}. {}: {}\n",
                index + 1,
                source.source_title.as_deref().unwrap_or("Unknown"),
                source.source_uri.as_deref().unwrap_or("")
            ));
        }
    }

    Some(block)
}

/// A directory event, reduced to what the markdown listing shows.
#[derive(Debug, Clone, Default)]
pub struct EventListing {
    pub title: String,
    pub url: String,
    pub date: Option<String>,
    pub place: Option<String>,
    pub description: Option<String>,
}

/// Render a list of events as markdown.
pub fn events_to_markdown(title: &str, events: &[EventListing], empty_message: &str) -> String {
    let mut out = format!("# {}\n\n", title);

    if events.is_empty() {
        out.push_str(empty_message);
        out.push('\n');
        return out;
    }

    for event in events {
        out.push_str(&format!("## {}\n\n", event.title));
        if let Some(date) = event.date.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("- Date: {}\n", date));
        }
        if let Some(place) = event.place.as_deref().filter(|p| !p.is_empty()) {
            out.push_str(&format!("- Place: {}\n", place));
        }
        out.push_str(&format!("- URL: {}\n\n", event.url));
        if let Some(description) = event.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(description);
            out.push_str("\n\n");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_result() {
        let result = text_result("hello");
        assert!(!result.is_error);
        assert_eq!(result.first_text(), Some("hello"));
        assert!(result.grounding.is_none());
    }

    #[test]
    fn test_upstream_error_result() {
        let result = upstream_error_result(&crate::error::Error::MissingCredential("GEMINI_API_KEY".into()));
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_grounded_without_metadata_is_verbatim() {
        let resp = response(json!({
            "candidates": [{ "content": { "parts": [{ "text": "Plain answer." }] } }]
        }));

        let result = grounded_result(&resp);
        assert_eq!(result.first_text(), Some("Plain answer."));
        assert!(result.grounding.unwrap().is_empty());
    }

    #[test]
    fn test_grounded_with_empty_metadata_is_verbatim() {
        let resp = response(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Plain answer." }] },
                "groundingMetadata": { "webSearchQueries": [], "groundingChunks": [] }
            }]
        }));

        assert_eq!(grounded_result(&resp).first_text(), Some("Plain answer."));
    }

    #[test]
    fn test_grounded_citation_block() {
        let resp = response(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Tokyo is large." }] },
                "groundingMetadata": {
                    "webSearchQueries": ["tokyo population"],
                    "groundingChunks": [
                        { "web": { "uri": "https://b.example", "title": "Second" } },
                        { "web": { "uri": "https://a.example" } }
                    ]
                }
            }]
        }));

        let result = grounded_result(&resp);
        let text = result.first_text().unwrap();

        assert!(text.starts_with("Tokyo is large.\n\n--- Search Sources ---\n"));

        let query_lines: Vec<_> = text.lines().filter(|l| l.starts_with("Search queries:")).collect();
        assert_eq!(query_lines, vec!["Search queries: tokyo population"]);

        let source_lines: Vec<_> = text
            .lines()
            .filter(|l| l.starts_with(|c: char| c.is_ascii_digit()))
            .collect();
        assert_eq!(
            source_lines,
            vec!["1. Second: https://b.example", "2. Unknown: https://a.example"]
        );

        let grounding = result.grounding.unwrap();
        assert_eq!(grounding.web_search_queries, vec!["tokyo population"]);
        assert_eq!(grounding.grounding_chunks.len(), 2);
    }

    #[test]
    fn test_citation_numbering_follows_upstream_order() {
        let chunks: Vec<_> = (0..5)
            .rev()
            .map(|i| GroundingSource {
                source_title: Some(format!("t{}", i)),
                source_uri: None,
            })
            .collect();
        let grounding = Grounding {
            web_search_queries: vec![],
            grounding_chunks: chunks,
        };

        let block = citation_block(&grounding).unwrap();
        let numbered: Vec<_> = block
            .lines()
            .filter(|l| l.starts_with(|c: char| c.is_ascii_digit()))
            .collect();
        assert_eq!(numbered, vec!["1. t4: ", "2. t3: ", "3. t2: ", "4. t1: ", "5. t0: "]);
        assert!(!block.contains("Search queries:"));
    }

    #[test]
    fn test_queries_are_comma_joined_on_one_line() {
        let grounding = Grounding {
            web_search_queries: vec!["a".into(), "b".into(), "c".into()],
            grounding_chunks: vec![],
        };
        let block = citation_block(&grounding).unwrap();
        assert!(block.contains("Search queries: a, b, c\n"));
        assert!(!block.contains("Sources:"));
    }

    #[test]
    fn test_events_to_markdown() {
        let events = vec![EventListing {
            title: "Rust Meetup".into(),
            url: "https://connpass.example/event/1".into(),
            date: Some("2025-01-10T19:00:00+09:00".into()),
            place: None,
            description: Some("Talks".into()),
        }];

        let md = events_to_markdown("Attended events", &events, "No events found.");
        assert!(md.starts_with("# Attended events\n"));
        assert!(md.contains("## Rust Meetup"));
        assert!(md.contains("- Date: 2025-01-10T19:00:00+09:00"));
        assert!(!md.contains("- Place:"));
        assert!(md.contains("- URL: https://connpass.example/event/1"));

        let empty = events_to_markdown("Attended events", &[], "No events found.");
        assert!(empty.contains("No events found."));
    }
}
