//! # Toolstream Core
//!
//! Domain types, traits, and error definitions shared by every crate in the
//! Toolstream pipeline. This crate has no HTTP or runtime dependencies beyond
//! `tokio::sync`. It defines the contracts the other crates implement.
//!
//! ## Layout
//!
//! - [`tool`]: the `Tool` contract and the statically validated `ToolRegistry`
//! - [`provider`]: the model-decision contract (`Provider`)
//! - [`scratchpad`]: the append-only record of completed iterations
//! - [`frame`]: the atomic unit of the step stream
//! - [`error`]: per-context error enums

pub mod error;
pub mod frame;
pub mod provider;
pub mod scratchpad;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, RegistryError, Result, StreamClosed, ToolError};
pub use frame::{FrameKind, StreamFrame};
pub use provider::{DecisionRequest, Provider, StreamChunk, ToolDefinition, Usage};
pub use scratchpad::ScratchpadEntry;
pub use tool::{FINAL_ANSWER_TOOL, FinalAnswer, Tool, ToolCall, ToolRegistry, ToolResult};
