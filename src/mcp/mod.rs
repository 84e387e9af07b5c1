//! Model Context Protocol (MCP) implementation.
//!
//! # Architecture
//!
//! - `protocol` - JSON-RPC and MCP message types
//! - `schema` - Tool argument validation
//! - `handler` - Tool handlers and the per-session registry
//! - `format` - Tool result formatting
//! - `transport` - Per-request HTTP transport
//! - `session` - Request-scoped session state machine
//! - `lifecycle` - Session supervision, teardown and shutdown

pub mod format;
pub mod handler;
pub mod lifecycle;
pub mod protocol;
pub mod schema;
pub mod session;
pub mod transport;

pub use handler::{ToolHandler, ToolRegistry};
pub use lifecycle::{Reply, Supervisor};
pub use protocol::*;
pub use session::{Session, SessionOutput, SessionRequest, SessionState};
pub use transport::{HttpTransport, Transport};
