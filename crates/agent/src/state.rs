//! Per-run agent state: an append-only scratchpad plus an iteration cursor.

use chrono::Utc;
use toolstream_core::ScratchpadEntry;

/// Owned by exactly one orchestrator run and dropped when it ends.
#[derive(Debug, Clone)]
pub struct AgentState {
    question: String,
    scratchpad: Vec<ScratchpadEntry>,
    iterations: u32,
    max_iterations: u32,
}

impl AgentState {
    pub fn new(question: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            question: question.into(),
            scratchpad: Vec::new(),
            iterations: 0,
            max_iterations,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn scratchpad(&self) -> &[ScratchpadEntry] {
        &self.scratchpad
    }

    pub fn into_scratchpad(self) -> Vec<ScratchpadEntry> {
        self.scratchpad
    }

    /// Decision rounds started so far.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Count one decision round.
    pub fn tick(&mut self) {
        self.iterations += 1;
    }

    /// No ordinary rounds left; the next one must be forced.
    pub fn cap_reached(&self) -> bool {
        self.iterations >= self.max_iterations
    }

    /// Append an entry. Indices are contiguous from 0.
    pub fn record(
        &mut self,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
        tool_output: impl Into<String>,
        success: bool,
    ) -> &ScratchpadEntry {
        let index = self.scratchpad.len() as u32;
        self.scratchpad.push(ScratchpadEntry {
            index,
            tool_name: tool_name.into(),
            tool_input,
            tool_output: tool_output.into(),
            success,
            recorded_at: Utc::now(),
        });
        &self.scratchpad[index as usize]
    }

    /// Most recent successful entry for a non-terminal tool.
    pub fn last_success(&self) -> Option<&ScratchpadEntry> {
        self.scratchpad
            .iter()
            .rev()
            .find(|e| e.success && e.tool_name != toolstream_core::FINAL_ANSWER_TOOL)
    }

    /// Names of non-terminal tools that succeeded, first use first.
    pub fn tools_used(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in &self.scratchpad {
            if entry.success
                && entry.tool_name != toolstream_core::FINAL_ANSWER_TOOL
                && !names.contains(&entry.tool_name)
            {
                names.push(entry.tool_name.clone());
            }
        }
        names
    }
}
