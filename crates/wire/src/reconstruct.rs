//! Step reconstruction: fold decoded step updates into a [`ChatOutput`].

use crate::decoder::{StepDecoder, StepState, StepUpdate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use toolstream_core::{FINAL_ANSWER_TOOL, FinalAnswer};
use tracing::debug;

/// Client-side view of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepViewModel {
    pub ordinal: u32,
    /// May be empty until the name arrives
    pub tool_name: String,
    pub raw_arguments: String,
    pub arguments: Option<serde_json::Value>,
    pub state: StepState,
}

impl StepViewModel {
    fn from_update(update: StepUpdate) -> Self {
        Self {
            ordinal: update.ordinal,
            tool_name: update.name,
            raw_arguments: update.raw_arguments,
            arguments: update.arguments,
            state: update.state,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_closed()
    }

    pub fn is_terminal(&self) -> bool {
        self.tool_name == FINAL_ANSWER_TOOL
    }

    /// Merge a newer update for the same ordinal. Closed steps are frozen;
    /// while streaming, a parse only replaces the current one if it exists.
    fn merge(&mut self, update: StepUpdate) {
        if self.is_complete() {
            return;
        }
        self.tool_name = update.name;
        if update.raw_arguments.len() >= self.raw_arguments.len() {
            self.raw_arguments = update.raw_arguments;
        }
        if update.state.is_closed() || update.arguments.is_some() {
            self.arguments = update.arguments;
        }
        self.state = update.state;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Streaming,
    /// The terminal step closed with an answer
    Complete,
    /// The stream ended without an answer
    Interrupted,
}

/// Everything the client knows about one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOutput {
    pub question: String,
    pub steps: Vec<StepViewModel>,
    pub final_answer: Option<String>,
    pub tools_used: BTreeSet<String>,
    pub status: ChatStatus,
}

impl ChatOutput {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            steps: Vec::new(),
            final_answer: None,
            tools_used: BTreeSet::new(),
            status: ChatStatus::Streaming,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ChatStatus::Complete
    }

    /// The step currently being streamed, if the output is still open.
    pub fn in_progress_step(&self) -> Option<&StepViewModel> {
        if self.status != ChatStatus::Streaming {
            return None;
        }
        self.steps.iter().rev().find(|s| !s.is_complete())
    }

    fn apply_update(&mut self, update: StepUpdate) {
        let index = update.ordinal as usize;
        let position = if index < self.steps.len() {
            self.steps[index].merge(update);
            index
        } else {
            self.steps.push(StepViewModel::from_update(update));
            self.steps.len() - 1
        };

        let step = &self.steps[position];
        if step.state != StepState::Complete {
            return;
        }
        let step = step.clone();
        if !step.is_terminal() {
            self.tools_used.insert(step.tool_name);
            return;
        }
        if self.status != ChatStatus::Streaming {
            return;
        }
        let Some(arguments) = step.arguments.as_ref() else {
            return;
        };
        // The same rule the server applies; a rejected terminal step is
        // followed by another one.
        match FinalAnswer::from_arguments(arguments) {
            Ok(parsed) => {
                debug!(ordinal = step.ordinal, "Final answer received");
                self.final_answer = Some(parsed.answer);
                self.status = ChatStatus::Complete;
                self.tools_used.extend(parsed.tools_used);
            }
            Err(e) => debug!(ordinal = step.ordinal, error = %e, "Terminal step rejected"),
        }
    }
}

/// Owns the decoder state and the output it is building.
#[derive(Debug)]
pub struct StepReconstructor {
    decoder: StepDecoder,
    output: ChatOutput,
}

impl StepReconstructor {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            decoder: StepDecoder::new(),
            output: ChatOutput::new(question),
        }
    }

    /// Fold one raw chunk into the output.
    pub fn apply(mut self, chunk: &[u8]) -> Self {
        for update in self.decoder.feed(chunk) {
            self.output.apply_update(update);
        }
        self
    }

    /// The byte stream ended. An output without an answer is interrupted.
    pub fn finish(mut self) -> ChatOutput {
        for update in self.decoder.finish() {
            self.output.apply_update(update);
        }
        if self.output.status == ChatStatus::Streaming {
            self.output.status = ChatStatus::Interrupted;
        }
        self.output
    }

    pub fn output(&self) -> &ChatOutput {
        &self.output
    }
}

/// Decode a complete body delivered as `chunks`.
pub fn reconstruct<'a>(
    question: &str,
    chunks: impl IntoIterator<Item = &'a [u8]>,
) -> ChatOutput {
    chunks
        .into_iter()
        .fold(StepReconstructor::new(question), StepReconstructor::apply)
        .finish()
}
