//! The orchestrator state machine.
//!
//! ```text
//! Deciding ──non-terminal──▶ Executing ──▶ Deciding
//!    │  └──final_answer──▶ Terminal ──valid──▶ done
//!    │                        └──invalid──▶ Deciding
//!    └──cap reached──▶ CapExceeded ──forced round──▶ done
//! ```
//!
//! Every decision round is one step on the wire. Tool failures (errors,
//! timeouts, unknown names, unparseable arguments) become scratchpad
//! entries and never end the run. Provider failures and a vanished
//! consumer are fatal: the run returns an error and the frame stream is
//! left without its end-of-stream marker.

use crate::multiplexer::FrameSink;
use crate::state::AgentState;
use std::sync::Arc;
use std::time::Duration;
use toolstream_config::AgentConfig;
use toolstream_core::error::{Error, ProviderError, ToolError};
use toolstream_core::provider::{DecisionRequest, Provider};
use toolstream_core::tool::{FINAL_ANSWER_TOOL, ToolCall, ToolRegistry, ToolResult};
use toolstream_core::{ScratchpadEntry, StreamFrame};
use tracing::{debug, info, warn};

/// One resolved model decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Step ordinal this decision was streamed under
    pub ordinal: u32,
    pub tool_name: String,
    /// Argument text exactly as streamed
    pub raw_arguments: String,
    /// Made in the forced terminal-only round
    pub forced: bool,
    /// The token stream went quiet for longer than the iteration timeout
    pub stalled: bool,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        self.tool_name == FINAL_ANSWER_TOOL
    }

    /// Parse the argument text. Empty text means no arguments.
    pub fn arguments(&self) -> Result<serde_json::Value, ToolError> {
        if self.raw_arguments.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&self.raw_arguments).map_err(|e| {
            ToolError::InvalidArguments(format!("{}: unparseable arguments: {e}", self.tool_name))
        })
    }
}

/// Where the loop is.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Deciding,
    Executing(Decision),
    Terminal(Decision),
    CapExceeded,
}

/// The result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The final answer text
    pub answer: String,
    /// Argument object of the terminal step
    pub final_arguments: serde_json::Value,
    /// Every recorded iteration, terminal step included
    pub scratchpad: Vec<ScratchpadEntry>,
    /// Model decisions made (at most `max_iterations + 1`)
    pub decision_rounds: u32,
    /// Steps published, including a synthesized final step
    pub steps: u32,
    /// The answer had to be built from the scratchpad
    pub synthesized: bool,
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
    iteration_timeout: Duration,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>) -> Self {
        let defaults = AgentConfig::default();
        Self {
            provider,
            tools,
            max_iterations: defaults.max_iterations,
            iteration_timeout: Duration::from_secs(defaults.iteration_timeout_secs),
        }
    }

    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Self {
        Self::new(provider, tools)
            .with_max_iterations(config.max_iterations)
            .with_iteration_timeout(Duration::from_secs(config.iteration_timeout_secs))
    }

    /// Set max iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Wall-clock limit for one tool invocation and for each wait on the
    /// decision token stream.
    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Answer `question`, streaming every step into `sink`.
    ///
    /// On success the stream is finished with an end-of-stream frame.
    pub async fn run(&self, question: &str, sink: &FrameSink) -> Result<RunOutcome, Error> {
        info!(
            provider = self.provider.name(),
            max_iterations = self.max_iterations,
            "Orchestrator run started"
        );

        let mut state = AgentState::new(question, self.max_iterations);
        let mut next_ordinal = 0u32;
        let mut phase = Phase::Deciding;

        let (answer, final_arguments, synthesized) = loop {
            phase = match phase {
                Phase::Deciding if state.cap_reached() => Phase::CapExceeded,
                Phase::Deciding => {
                    let decision = self.decide(&mut state, next_ordinal, false, sink).await?;
                    if !decision.tool_name.is_empty() {
                        next_ordinal += 1;
                    }
                    if decision.stalled {
                        self.record_stall(&mut state, &decision);
                        Phase::Deciding
                    } else if decision.is_terminal() {
                        Phase::Terminal(decision)
                    } else {
                        Phase::Executing(decision)
                    }
                }
                Phase::Executing(decision) => {
                    self.execute(&mut state, &decision).await;
                    Phase::Deciding
                }
                Phase::Terminal(decision) => match self.conclude(&mut state, &decision).await {
                    Ok((answer, arguments)) => break (answer, arguments, false),
                    Err(e) => {
                        warn!(ordinal = decision.ordinal, error = %e, "Rejected final answer");
                        state.record(
                            FINAL_ANSWER_TOOL,
                            raw_input(&decision),
                            format!("Error: {e}"),
                            false,
                        );
                        if decision.forced {
                            break self.synthesize(&mut state, &mut next_ordinal, sink).await?;
                        }
                        Phase::Deciding
                    }
                },
                Phase::CapExceeded => {
                    warn!(
                        iterations = state.iterations(),
                        "Iteration cap reached, forcing final answer"
                    );
                    let decision = self.decide(&mut state, next_ordinal, true, sink).await?;
                    if !decision.tool_name.is_empty() {
                        next_ordinal += 1;
                    }
                    if decision.stalled {
                        self.record_stall(&mut state, &decision);
                        break self.synthesize(&mut state, &mut next_ordinal, sink).await?;
                    } else if decision.is_terminal() {
                        Phase::Terminal(decision)
                    } else {
                        warn!(tool = %decision.tool_name, "Forced round selected a non-terminal tool");
                        state.record(
                            decision.tool_name.clone(),
                            raw_input(&decision),
                            "Error: only final_answer may be used in the final round",
                            false,
                        );
                        break self.synthesize(&mut state, &mut next_ordinal, sink).await?;
                    }
                }
            };
        };

        sink.finish(next_ordinal).await?;

        let decision_rounds = state.iterations();
        info!(decision_rounds, steps = next_ordinal, synthesized, "Orchestrator run finished");

        Ok(RunOutcome {
            answer,
            final_arguments,
            scratchpad: state.into_scratchpad(),
            decision_rounds,
            steps: next_ordinal,
            synthesized,
        })
    }

    /// One decision round: stream the provider's tokens as step frames.
    ///
    /// Each wait for a token is bounded by the iteration timeout. A stalled
    /// stream closes whatever step it opened and comes back as a `stalled`
    /// decision; a stall before any name was streamed publishes nothing.
    async fn decide(
        &self,
        state: &mut AgentState,
        ordinal: u32,
        forced: bool,
        sink: &FrameSink,
    ) -> Result<Decision, Error> {
        state.tick();
        debug!(ordinal, iteration = state.iterations(), forced, "Requesting decision");

        let request = DecisionRequest {
            question: state.question().to_string(),
            tools: if forced {
                self.tools.definitions_for(&[FINAL_ANSWER_TOOL])
            } else {
                self.tools.definitions()
            },
            scratchpad: state.scratchpad().to_vec(),
            forced_tool: forced.then(|| FINAL_ANSWER_TOOL.to_string()),
        };

        let mut tokens = self.provider.decide(request).await?;
        let mut tool_name = String::new();
        let mut raw_arguments = String::new();

        let stalled = loop {
            let chunk = match tokio::time::timeout(self.iteration_timeout, tokens.recv()).await {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => break false,
                Err(_) => {
                    warn!(ordinal, timeout = ?self.iteration_timeout, "Decision stream stalled");
                    break true;
                }
            };
            if let Some(name) = chunk.tool_name.filter(|n| !n.is_empty()) {
                sink.publish(StreamFrame::step_name(ordinal, name.clone())).await?;
                tool_name.push_str(&name);
            }
            if let Some(fragment) = chunk.arguments.filter(|a| !a.is_empty()) {
                sink.publish(StreamFrame::step_token(ordinal, fragment.clone())).await?;
                raw_arguments.push_str(&fragment);
            }
            if let Some(usage) = &chunk.usage {
                debug!(
                    ordinal,
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    total_tokens = usage.total_tokens,
                    "Decision token usage"
                );
            }
            if chunk.done {
                break false;
            }
        };

        if stalled {
            if !tool_name.is_empty() {
                sink.publish(StreamFrame::step_end(ordinal)).await?;
            }
            return Ok(Decision {
                ordinal,
                tool_name,
                raw_arguments,
                forced,
                stalled,
            });
        }

        if tool_name.is_empty() {
            return Err(ProviderError::StreamInterrupted(
                "decision ended without selecting a tool".into(),
            )
            .into());
        }

        sink.publish(StreamFrame::step_end(ordinal)).await?;
        debug!(ordinal, tool = %tool_name, "Decision resolved");

        Ok(Decision {
            ordinal,
            tool_name,
            raw_arguments,
            forced,
            stalled,
        })
    }

    /// Record a stalled decision as a failed iteration.
    fn record_stall(&self, state: &mut AgentState, decision: &Decision) {
        let tool_name = if decision.tool_name.is_empty() {
            "(none)".to_string()
        } else {
            decision.tool_name.clone()
        };
        state.record(
            tool_name,
            raw_input(decision),
            format!("Error: decision timed out after {:?}", self.iteration_timeout),
            false,
        );
    }

    /// Run a non-terminal tool and record what happened.
    async fn execute(&self, state: &mut AgentState, decision: &Decision) {
        let outcome = match decision.arguments() {
            Ok(arguments) => self
                .invoke(decision, arguments.clone())
                .await
                .map(|result| (arguments, result)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok((arguments, result)) => {
                debug!(tool = %decision.tool_name, output = %result.output, "Tool succeeded");
                state.record(decision.tool_name.clone(), arguments, result.output, true);
            }
            Err(e) => {
                warn!(tool = %decision.tool_name, error = %e, "Tool failed");
                let input = decision.arguments().unwrap_or_else(|_| raw_input(decision));
                state.record(decision.tool_name.clone(), input, format!("Error: {e}"), false);
            }
        }
    }

    /// Validate a terminal decision and record it.
    async fn conclude(
        &self,
        state: &mut AgentState,
        decision: &Decision,
    ) -> Result<(String, serde_json::Value), ToolError> {
        let arguments = decision.arguments()?;
        let result = self.invoke(decision, arguments.clone()).await?;
        state.record(FINAL_ANSWER_TOOL, arguments.clone(), result.output.clone(), true);
        Ok((result.output, arguments))
    }

    /// Build a final answer from the scratchpad when the forced round
    /// did not produce one, and publish it as its own step.
    async fn synthesize(
        &self,
        state: &mut AgentState,
        next_ordinal: &mut u32,
        sink: &FrameSink,
    ) -> Result<(String, serde_json::Value, bool), Error> {
        let answer = match state.last_success() {
            Some(entry) => format!(
                "I could not finish within the iteration limit. The last result was {} (from {}).",
                entry.tool_output, entry.tool_name
            ),
            None => "I could not find an answer within the iteration limit.".to_string(),
        };
        let arguments = serde_json::json!({
            "answer": answer,
            "tools_used": state.tools_used(),
        });

        let ordinal = *next_ordinal;
        *next_ordinal += 1;
        warn!(ordinal, "Synthesizing final answer from scratchpad");

        sink.publish(StreamFrame::step_name(ordinal, FINAL_ANSWER_TOOL)).await?;
        sink.publish(StreamFrame::step_token(ordinal, arguments.to_string())).await?;
        sink.publish(StreamFrame::step_end(ordinal)).await?;

        state.record(FINAL_ANSWER_TOOL, arguments.clone(), answer.clone(), true);
        Ok((answer, arguments, true))
    }

    async fn invoke(
        &self,
        decision: &Decision,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let call = ToolCall {
            id: format!("call_{}", decision.ordinal),
            name: decision.tool_name.clone(),
            arguments,
        };
        match tokio::time::timeout(self.iteration_timeout, self.tools.execute(&call)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: decision.tool_name.clone(),
                timeout_secs: self.iteration_timeout.as_secs(),
            }),
        }
    }
}

/// Raw argument text as a JSON string, for entries whose arguments never parsed.
fn raw_input(decision: &Decision) -> serde_json::Value {
    serde_json::Value::String(decision.raw_arguments.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::frame_channel;
    use async_trait::async_trait;
    use futures::StreamExt;
    use toolstream_config::SearchConfig;
    use toolstream_core::FrameKind;
    use toolstream_core::tool::Tool;
    use toolstream_providers::{ScriptedDecision, ScriptedProvider};

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(toolstream_tools::default_registry(&SearchConfig::default()).unwrap())
    }

    async fn run_collect(
        orchestrator: &Orchestrator,
        question: &str,
    ) -> (Result<RunOutcome, Error>, Vec<StreamFrame>) {
        let (sink, stream) = frame_channel(8);
        let run = async move { orchestrator.run(question, &sink).await };
        tokio::join!(run, stream.collect::<Vec<StreamFrame>>())
    }

    /// Concatenated name and argument text per ordinal.
    fn steps(frames: &[StreamFrame]) -> Vec<(u32, String, String)> {
        let mut out: Vec<(u32, String, String)> = Vec::new();
        for frame in frames {
            let ordinal = frame.ordinal;
            if !matches!(frame.kind, FrameKind::StepName(_) | FrameKind::StepToken(_)) {
                continue;
            }
            if out.last().map(|s| s.0) != Some(ordinal) {
                out.push((ordinal, String::new(), String::new()));
            }
            let (_, name, args) = out.last_mut().unwrap();
            match &frame.kind {
                FrameKind::StepName(n) => name.push_str(n),
                FrameKind::StepToken(t) => args.push_str(t),
                _ => {}
            }
        }
        out
    }

    #[tokio::test]
    async fn exponentiate_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::new("exponentiate", serde_json::json!({"base": 25, "power": 3})),
            ScriptedDecision::final_answer("25 to the power of 3 is 15625.", &["exponentiate"]),
        ]));
        let orchestrator = Orchestrator::new(provider, registry()).with_max_iterations(5);

        let (outcome, frames) = run_collect(&orchestrator, "What is 25 to the power of 3?").await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.decision_rounds, 2);
        assert!(outcome.answer.contains("15625"));
        assert!(!outcome.synthesized);
        assert_eq!(outcome.scratchpad.len(), 2);
        assert_eq!(outcome.scratchpad[0].tool_name, "exponentiate");
        assert_eq!(outcome.scratchpad[0].tool_output, "15625");
        assert_eq!(outcome.scratchpad[1].tool_name, FINAL_ANSWER_TOOL);

        let steps = steps(&frames);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], (0, "exponentiate".into(), r#"{"base":25,"power":3}"#.into()));
        assert_eq!(steps[1].1, FINAL_ANSWER_TOOL);

        let last = frames.last().unwrap();
        assert!(last.is_end_of_stream());
        assert_eq!(last.ordinal, 2);
    }

    #[tokio::test]
    async fn each_step_ends_with_step_end() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::new("add", serde_json::json!({"x": 1, "y": 2})),
            ScriptedDecision::final_answer("3", &["add"]),
        ]));
        let orchestrator = Orchestrator::new(provider, registry());

        let (_, frames) = run_collect(&orchestrator, "1 + 2?").await;
        let ends: Vec<u32> = frames
            .iter()
            .filter(|f| f.kind == FrameKind::StepEnd)
            .map(|f| f.ordinal)
            .collect();
        assert_eq!(ends, vec![0, 1]);
    }

    #[tokio::test]
    async fn cap_forces_terminal_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::new("add", serde_json::json!({"x": 1, "y": 2})),
            ScriptedDecision::new("multiply", serde_json::json!({"x": 3, "y": 4})),
            ScriptedDecision::final_answer("12", &["add", "multiply"]),
        ]));
        let orchestrator = Orchestrator::new(provider.clone(), registry()).with_max_iterations(2);

        let (outcome, _) = run_collect(&orchestrator, "q").await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.decision_rounds, 3);
        assert_eq!(outcome.answer, "12");

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].forced_tool, None);
        assert_eq!(requests[2].forced_tool.as_deref(), Some(FINAL_ANSWER_TOOL));
        assert_eq!(requests[2].tools.len(), 1);
        assert_eq!(requests[2].tools[0].name, FINAL_ANSWER_TOOL);
        assert_eq!(requests[2].scratchpad.len(), 2);
    }

    #[tokio::test]
    async fn forced_round_ignored_is_synthesized() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::new("add", serde_json::json!({"x": 1, "y": 2})),
            ScriptedDecision::new("multiply", serde_json::json!({"x": 3, "y": 4})),
        ]));
        let orchestrator = Orchestrator::new(provider.clone(), registry()).with_max_iterations(1);

        let (outcome, frames) = run_collect(&orchestrator, "q").await;
        let outcome = outcome.unwrap();

        assert!(outcome.synthesized);
        assert_eq!(outcome.decision_rounds, 2);
        assert_eq!(provider.call_count(), 2);
        assert!(outcome.answer.contains('3'));
        assert_eq!(outcome.final_arguments["tools_used"], serde_json::json!(["add"]));

        let steps = steps(&frames);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].1, FINAL_ANSWER_TOOL);
        let parsed: serde_json::Value = serde_json::from_str(&steps[2].2).unwrap();
        assert_eq!(parsed["answer"], outcome.answer.as_str());
        assert!(frames.last().unwrap().is_end_of_stream());
    }

    #[tokio::test]
    async fn invalid_final_answer_is_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::raw(FINAL_ANSWER_TOOL, r#"{"answer": 15"#),
            ScriptedDecision::final_answer("15", &[]),
        ]));
        let orchestrator = Orchestrator::new(provider, registry()).with_max_iterations(3);

        let (outcome, _) = run_collect(&orchestrator, "q").await;
        let outcome = outcome.unwrap();

        assert_eq!(outcome.answer, "15");
        assert_eq!(outcome.decision_rounds, 2);
        assert!(!outcome.scratchpad[0].success);
        assert!(outcome.scratchpad[0].tool_output.contains("unparseable"));
    }

    #[tokio::test]
    async fn web_search_failure_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::new("web_search", serde_json::json!({"query": "rust"})),
            ScriptedDecision::final_answer("Search is unavailable.", &[]),
        ]));
        let orchestrator = Orchestrator::new(provider.clone(), registry());

        let (outcome, _) = run_collect(&orchestrator, "What is Rust?").await;
        let outcome = outcome.unwrap();

        let failed = &outcome.scratchpad[0];
        assert_eq!(failed.tool_name, "web_search");
        assert!(!failed.success);
        assert!(failed.tool_output.starts_with("Error:"));

        // The failure is fed back into the next round.
        let second = &provider.requests()[1];
        assert_eq!(second.scratchpad.len(), 1);
        assert!(!second.scratchpad[0].success);
    }

    #[tokio::test]
    async fn unknown_tool_is_recorded_as_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::new("divide", serde_json::json!({"x": 1, "y": 2})),
            ScriptedDecision::final_answer("0.5", &[]),
        ]));
        let orchestrator = Orchestrator::new(provider, registry());

        let (outcome, _) = run_collect(&orchestrator, "q").await;
        let outcome = outcome.unwrap();
        assert!(outcome.scratchpad[0].tool_output.contains("Tool not found: divide"));
        assert_eq!(outcome.answer, "0.5");
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolResult::ok("too late"))
        }
    }

    #[tokio::test]
    async fn tool_timeout_is_recorded_as_failure() {
        let mut tools = toolstream_tools::default_registry(&SearchConfig::default()).unwrap();
        tools.register(Box::new(SlowTool)).unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedDecision::new("slow", serde_json::json!({})),
            ScriptedDecision::final_answer("gave up", &[]),
        ]));
        let orchestrator = Orchestrator::new(provider, Arc::new(tools))
            .with_iteration_timeout(Duration::from_millis(50));

        let (outcome, _) = run_collect(&orchestrator, "q").await;
        let outcome = outcome.unwrap();
        assert!(!outcome.scratchpad[0].success);
        assert!(outcome.scratchpad[0].tool_output.contains("timed out"));
    }

    #[tokio::test]
    async fn stalled_decision_is_recorded_as_failure() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![
                ScriptedDecision::new("add", serde_json::json!({"x": 1, "y": 2})),
                ScriptedDecision::final_answer("never finished", &[]),
            ])
            .with_token_delay(Duration::from_millis(200)),
        );
        let orchestrator = Orchestrator::new(provider.clone(), registry())
            .with_max_iterations(1)
            .with_iteration_timeout(Duration::from_millis(50));

        let (outcome, frames) = run_collect(&orchestrator, "q").await;
        let outcome = outcome.unwrap();

        // Both rounds stall before naming a tool, so only the synthesized
        // step reaches the wire.
        assert_eq!(provider.call_count(), 2);
        assert!(outcome.synthesized);
        assert!(!outcome.scratchpad[0].success);
        assert!(outcome.scratchpad[0].tool_output.contains("timed out"));

        let steps = steps(&frames);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].0, 0);
        assert_eq!(steps[0].1, FINAL_ANSWER_TOOL);
        assert!(frames.last().unwrap().is_end_of_stream());
    }

    /// Streams a tool name, then never finishes.
    struct StallAfterName;

    #[async_trait]
    impl Provider for StallAfterName {
        fn name(&self) -> &str {
            "stall"
        }

        async fn decide(
            &self,
            _request: DecisionRequest,
        ) -> Result<toolstream_core::provider::DecisionStream, ProviderError> {
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            tokio::spawn(async move {
                let name = toolstream_core::provider::StreamChunk::name("add");
                if tx.send(Ok(name)).await.is_ok() {
                    tx.closed().await;
                }
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn stall_mid_step_closes_the_step() {
        let orchestrator = Orchestrator::new(Arc::new(StallAfterName), registry())
            .with_max_iterations(1)
            .with_iteration_timeout(Duration::from_millis(50));

        let (outcome, frames) = run_collect(&orchestrator, "q").await;
        let outcome = outcome.unwrap();
        assert!(outcome.synthesized);
        assert_eq!(outcome.scratchpad[0].tool_name, "add");
        assert!(!outcome.scratchpad[0].success);
        assert!(!outcome.scratchpad[1].success);

        let ends: Vec<u32> = frames
            .iter()
            .filter(|f| f.kind == FrameKind::StepEnd)
            .map(|f| f.ordinal)
            .collect();
        assert_eq!(ends, vec![0, 1, 2]);
        assert_eq!(frames.last().unwrap().ordinal, 3);
    }

    #[tokio::test]
    async fn disconnected_consumer_aborts_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedDecision::final_answer(
            "never seen",
            &[],
        )]));
        let orchestrator = Orchestrator::new(provider, registry());

        let (sink, stream) = frame_channel(1);
        drop(stream);
        let err = orchestrator.run("q", &sink).await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[tokio::test]
    async fn provider_failure_truncates_stream() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedDecision::new(
            "add",
            serde_json::json!({"x": 1, "y": 2}),
        )]));
        let orchestrator = Orchestrator::new(provider, registry());

        let (outcome, frames) = run_collect(&orchestrator, "q").await;
        assert!(matches!(outcome, Err(Error::Provider(_))));
        assert!(!frames.iter().any(StreamFrame::is_end_of_stream));
    }

    #[test]
    fn empty_arguments_are_an_empty_object() {
        let decision = Decision {
            ordinal: 0,
            tool_name: "noop".into(),
            raw_arguments: "  ".into(),
            forced: false,
            stalled: false,
        };
        assert_eq!(decision.arguments().unwrap(), serde_json::json!({}));
    }
}
