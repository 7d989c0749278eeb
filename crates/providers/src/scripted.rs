//! Scripted provider: replays a fixed list of decisions.
//!
//! Each call to `decide` returns the next decision in the script, streamed
//! token by token the way a real model would: the tool name first, then the
//! argument JSON in small fragments. Used for offline runs and tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use toolstream_core::error::ProviderError;
use toolstream_core::provider::{DecisionRequest, DecisionStream, Provider, StreamChunk};

/// One scripted tool selection.
#[derive(Debug, Clone)]
pub struct ScriptedDecision {
    pub tool_name: String,
    /// Raw argument text, streamed verbatim
    pub arguments: String,
}

impl ScriptedDecision {
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// A decision whose argument text is taken as-is (may be invalid JSON).
    pub fn raw(tool_name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: arguments.into(),
        }
    }

    /// A `final_answer` decision.
    pub fn final_answer(answer: &str, tools_used: &[&str]) -> Self {
        Self::new(
            toolstream_core::FINAL_ANSWER_TOOL,
            serde_json::json!({ "answer": answer, "tools_used": tools_used }),
        )
    }
}

pub struct ScriptedProvider {
    decisions: Vec<ScriptedDecision>,
    fragment_chars: usize,
    token_delay: Option<Duration>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedProvider {
    pub fn new(decisions: Vec<ScriptedDecision>) -> Self {
        Self {
            decisions,
            fragment_chars: 4,
            token_delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Split argument text into fragments of this many characters.
    pub fn with_fragment_chars(mut self, chars: usize) -> Self {
        self.fragment_chars = chars.max(1);
        self
    }

    /// Sleep between tokens.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn fragments(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.fragment_chars)
            .map(|c| c.iter().collect())
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(&self, request: DecisionRequest) -> Result<DecisionStream, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request);
            requests.len() - 1
        };

        let decision = self.decisions.get(call).cloned().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "script exhausted (call #{}, have {})",
                call,
                self.decisions.len()
            ))
        })?;

        let mut chunks = vec![StreamChunk::name(decision.tool_name.clone())];
        chunks.extend(
            self.fragments(&decision.arguments)
                .into_iter()
                .map(StreamChunk::args),
        );
        chunks.push(StreamChunk::done());

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let delay = self.token_delay;
        tokio::spawn(async move {
            for chunk in chunks {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}
