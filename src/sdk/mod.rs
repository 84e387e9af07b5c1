//! Upstream API clients.
//!
//! - `gemini` - `generateContent` on the Gemini Developer API and Vertex AI
//! - `connpass` - connpass v2 user event endpoints
//! - `types` - Wire types shared by both

pub mod connpass;
pub mod gemini;
pub mod types;

pub use connpass::{ConnpassClient, UserEventKind};
pub use gemini::{Backend, GeminiClient, ModelTarget};
