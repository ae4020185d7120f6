//! Capability protocol value types
//!
//! The bridge produces and consumes these types; the wire framing around
//! them is owned by the protocol layer embedding this crate.

mod types;

pub use types::{
    ExecutionRequest, Prompt, PromptArgument, PromptMessage, Resource, ResourceContents, Tool,
    ToolAnnotations, ToolResult,
};
