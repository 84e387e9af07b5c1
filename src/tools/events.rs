//! connpass user event tools.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::mcp::format::{events_to_markdown, text_result, EventListing};
use crate::mcp::handler::{get_optional_int_arg, get_string_arg, Arguments, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::sdk::connpass::{ConnpassClient, UserEventKind};
use crate::sdk::types::ConnpassEvent;

/// Events returned when the caller gives no count.
pub const DEFAULT_COUNT: u32 = 10;

/// Upper bound accepted by the directory API.
pub const MAX_COUNT: u32 = 100;

/// Lists events a user attended or presented at.
pub struct UserEventsTool {
    client: Arc<ConnpassClient>,
    kind: UserEventKind,
}

impl UserEventsTool {
    pub fn attended(client: Arc<ConnpassClient>) -> Self {
        Self {
            client,
            kind: UserEventKind::Attended,
        }
    }

    pub fn presenter(client: Arc<ConnpassClient>) -> Self {
        Self {
            client,
            kind: UserEventKind::Presenter,
        }
    }

    fn heading(&self, nickname: &str) -> String {
        match self.kind {
            UserEventKind::Attended => format!("Events attended by {}", nickname),
            UserEventKind::Presenter => format!("Events presented by {}", nickname),
        }
    }
}

fn listing(event: &ConnpassEvent) -> EventListing {
    EventListing {
        title: event.title.clone(),
        url: event.url.clone(),
        date: event.started_at.clone(),
        place: event.place.clone(),
        description: event.catch.clone(),
    }
}

fn clamp_count(count: Option<i64>) -> u32 {
    match count {
        Some(n) if n >= 1 => n.min(MAX_COUNT as i64) as u32,
        _ => DEFAULT_COUNT,
    }
}

#[async_trait]
impl ToolHandler for UserEventsTool {
    fn definition(&self) -> Tool {
        let (name, description) = match self.kind {
            UserEventKind::Attended => (
                "get_user_attended_events",
                "Lists connpass events the given user has attended.",
            ),
            UserEventKind::Presenter => (
                "get_user_presenter_events",
                "Lists connpass events where the given user was a presenter.",
            ),
        };

        Tool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: crate::tool_schema!(required: ["nickname"],
                "nickname": {
                    "type": "string",
                    "description": "connpass user nickname"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of events to return (1-100, default 10)"
                }
            ),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let nickname = get_string_arg(&args, "nickname")?;
        let count = clamp_count(get_optional_int_arg(&args, "count"));

        let response = self.client.user_events(self.kind, &nickname, count).await?;
        let events: Vec<EventListing> = response.events.iter().map(listing).collect();

        Ok(text_result(events_to_markdown(
            &self.heading(&nickname),
            &events,
            "No events found.",
        )))
    }
}
