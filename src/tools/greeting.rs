//! Random greeting tool.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::seq::SliceRandom;

use crate::error::Result;
use crate::mcp::format::text_result;
use crate::mcp::handler::{get_string_arg, Arguments, ToolHandler};
use crate::mcp::protocol::{Tool, ToolResult};

const GREETINGS: &[&str] = &[
    "Hello! Wishing you a wonderful day!",
    "Good morning! A brand new day is starting!",
    "Good evening! Thanks for all your hard work today!",
    "Nice to meet you! Looking forward to working together!",
    "How are you? What kind of day has it been?",
    "Welcome! Is there anything I can help you with?",
    "What a lovely day! Did anything fun happen?",
    "Great work today! You're doing really well!",
    "Hi there! Have a bright and smiling day!",
    "So glad to see you! How is your day going?",
    "Have a fantastic day! I'm rooting for you!",
    "Another day done, well done! Get some good rest!",
];

/// Returns a random greeting that echoes the caller's message.
pub struct RandomGreetingTool;

impl RandomGreetingTool {
    pub fn new() -> Self {
        Self
    }

    fn render(greeting: &str, prompt: &str) -> String {
        format!(
            "{}\n\n(Your message: \"{}\")\nGenerated at: {}",
            greeting,
            prompt,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        )
    }
}

impl Default for RandomGreetingTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for RandomGreetingTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "get_random_greeting".to_string(),
            description: "Returns a random greeting together with the user's message.".to_string(),
            input_schema: crate::tool_schema!(required: ["userPrompt"],
                "userPrompt": {
                    "type": "string",
                    "description": "The user's message to echo back"
                }
            ),
        }
    }

    async fn execute(&self, args: Arguments) -> Result<ToolResult> {
        let prompt = get_string_arg(&args, "userPrompt")?;
        let greeting = GREETINGS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(GREETINGS[0]);

        Ok(text_result(Self::render(greeting, &prompt)))
    }
}
