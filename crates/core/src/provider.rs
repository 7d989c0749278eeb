//! Provider trait: the model-decision collaborator.
//!
//! A Provider receives the question, the tool definitions and the scratchpad
//! so far, and streams back tokens that resolve to exactly one tool selection
//! with a JSON argument object. The orchestrator never sees prompts or
//! sampling settings; those belong to the implementation.

use crate::error::ProviderError;
use crate::scratchpad::ScratchpadEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One decision request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// The user's original question
    pub question: String,

    /// Tools the model may choose from
    pub tools: Vec<ToolDefinition>,

    /// Completed iterations, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scratchpad: Vec<ScratchpadEntry>,

    /// When set, the model must select this tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_tool: Option<String>,
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streamed decision.
///
/// The tool name usually arrives once, in the first chunk; argument text
/// arrives as fragments that concatenate to the full JSON object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Tool name fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Argument JSON fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn args(fragment: impl Into<String>) -> Self {
        Self {
            arguments: Some(fragment.into()),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Receiving half of a streamed decision.
pub type DecisionStream = mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The orchestrator calls `decide()` once per iteration without knowing
/// which backend answers it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Start a decision and return the stream of its tokens.
    ///
    /// The stream ends after a chunk with `done: true` or when the sender is
    /// dropped; both mean the decision is fully resolved.
    async fn decide(&self, request: DecisionRequest) -> Result<DecisionStream, ProviderError>;
}
