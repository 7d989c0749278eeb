//! Scratchpad entries: the agent's working memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed iteration: which tool ran, with what input, and what came
/// back. A failed invocation stores the error description as its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadEntry {
    /// Position in the scratchpad (0-based, contiguous)
    pub index: u32,

    /// Name of the selected tool
    pub tool_name: String,

    /// Parsed arguments the tool was invoked with
    pub tool_input: serde_json::Value,

    /// Tool output, or the failure description
    pub tool_output: String,

    /// Whether the invocation succeeded
    pub success: bool,

    /// When the entry was appended
    pub recorded_at: DateTime<Utc>,
}

impl ScratchpadEntry {
    /// The call id used when the entry is replayed to a model as a
    /// tool-call / tool-result pair.
    pub fn call_id(&self) -> String {
        format!("call_{}", self.index)
    }
}
