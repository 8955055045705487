pub mod client;
pub mod registry;

pub use registry::{McpRegistry, ServerStatus, ToolError};
